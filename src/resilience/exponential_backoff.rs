use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::BackendError;

/// Exponential backoff schedule for retries
pub struct ExponentialBackoff {
    /// Number of failed attempts seen so far
    current_attempt: usize,
    /// Configuration for the retry strategy
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_attempt: 0,
            config,
        }
    }

    /// Delay to wait after the next failed attempt, or None once that
    /// attempt was the last one allowed.
    ///
    /// After failed attempt `n` (starting at 1) the delay is
    /// `base_delay * multiplier^n`, capped at `max_delay`.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.current_attempt += 1;

        if self.current_attempt >= self.config.max_attempts {
            return None;
        }

        let base_ms = self.config.base_delay.as_millis() as f64;
        let backoff_ms = base_ms * self.config.multiplier.powi(self.current_attempt as i32);
        let max_ms = self.config.max_delay.as_millis() as f64;
        let capped_ms = backoff_ms.min(max_ms);

        let jittered_ms = if self.config.use_jitter {
            // Add jitter: random value between 50% and 100% of the calculated backoff
            let jitter = rand::random::<f64>() * 0.5 + 0.5;
            (capped_ms * jitter) as u64
        } else {
            capped_ms as u64
        };

        Some(Duration::from_millis(jittered_ms))
    }

    /// Reset the backoff to start from the beginning
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Call `operation` up to `config.max_attempts` times, sleeping between
/// failures. Returns the first success or the last failure.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T, BackendError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut backoff = ExponentialBackoff::new(config.clone());
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => match backoff.next_backoff() {
                Some(delay) => {
                    debug!(
                        "Retrying {} in {:?} (attempt {}/{}): {}",
                        label, delay, attempt, config.max_attempts, e
                    );
                    time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
        }
    }
}
