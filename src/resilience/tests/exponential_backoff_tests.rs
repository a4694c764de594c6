// src/resilience/tests/exponential_backoff_tests.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::BackendError;
use crate::resilience::{retry_with_backoff, ExponentialBackoff, RetryConfig};

fn config(max_attempts: usize, base_ms: u64) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(base_ms),
        multiplier: 2.0,
        max_delay: Duration::from_secs(60),
        use_jitter: false, // Disable jitter for deterministic testing
    }
}

fn unavailable() -> BackendError {
    BackendError::Unavailable {
        backend: "test".to_string(),
        reason: "down".to_string(),
    }
}

#[test]
fn test_backoff_doubles_from_two_base_units() {
    let mut backoff = ExponentialBackoff::new(config(5, 1000));

    // After failed attempt n the delay is 2^n * base
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(2000)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(4000)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(8000)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(16000)));

    // The fifth attempt is the last one; no sleep follows it
    assert_eq!(backoff.next_backoff(), None);
}

#[test]
fn test_default_schedule_sleeps_twice() {
    let mut backoff = ExponentialBackoff::new(RetryConfig::default());

    assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(4)));
    assert_eq!(backoff.next_backoff(), None);
}

#[test]
fn test_backoff_respects_max_delay() {
    let mut cfg = config(5, 100);
    cfg.max_delay = Duration::from_millis(300);
    let mut backoff = ExponentialBackoff::new(cfg);

    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
    // 400ms capped
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(300)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(300)));
}

#[test]
fn test_jitter_stays_within_half_to_full() {
    let mut cfg = config(4, 100);
    cfg.use_jitter = true;
    let mut backoff = ExponentialBackoff::new(cfg);

    let first = backoff.next_backoff().unwrap();
    assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(200));

    let second = backoff.next_backoff().unwrap();
    assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(400));
}

#[test]
fn test_reset_restarts_sequence() {
    let mut backoff = ExponentialBackoff::new(config(3, 100));

    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
    assert_eq!(backoff.next_backoff(), None);

    backoff.reset();

    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
}

#[test]
fn test_single_attempt_never_sleeps() {
    let mut backoff = ExponentialBackoff::new(config(1, 100));
    assert_eq!(backoff.next_backoff(), None);
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_at_first_success() {
    let calls = AtomicUsize::new(0);

    let result = retry_with_backoff(&config(3, 10), "test", |attempt| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < 2 {
                Err(unavailable())
            } else {
                Ok(attempt)
            }
        }
    })
    .await;

    assert_eq!(result, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhausts_and_returns_last_error() {
    let calls = AtomicUsize::new(0);
    let started = Instant::now();

    let result: Result<(), _> = retry_with_backoff(&config(3, 10), "test", |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(unavailable()) }
    })
    .await;

    assert_eq!(result, Err(unavailable()));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Slept 20ms + 40ms of virtual time between the three calls
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(60) && elapsed < Duration::from_millis(70));
}
