// src/test_utils.rs

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::backend::DeliveryBackend;
use crate::config::{CircuitBreakerConfig, DispatcherConfig, RetryConfig};
use crate::error::BackendError;
use crate::message::{Email, EmailContent};

/// Shared record of (backend, email) calls across several backends
pub type CallLog = Arc<Mutex<Vec<(String, Uuid)>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Backend whose outcomes are scripted up front.
///
/// Each call pops the next outcome (`true` = success); once the script runs
/// out, `default_outcome` is used.
#[derive(Debug)]
pub struct ScriptedBackend {
    name: String,
    script: Mutex<VecDeque<bool>>,
    default_outcome: bool,
    delay: Duration,
    healthy: AtomicBool,
    calls: AtomicUsize,
    log: CallLog,
}

impl ScriptedBackend {
    pub fn new(name: &str, default_outcome: bool, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            default_outcome,
            delay: Duration::ZERO,
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            log: Arc::clone(log),
        }
    }

    pub fn always_ok(name: &str, log: &CallLog) -> Arc<Self> {
        Arc::new(Self::new(name, true, log))
    }

    pub fn always_failing(name: &str, log: &CallLog) -> Arc<Self> {
        Arc::new(Self::new(name, false, log))
    }

    pub fn with_script(mut self, outcomes: &[bool]) -> Self {
        self.script = Mutex::new(outcomes.iter().copied().collect());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, email: &Email) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push((self.name.clone(), email.id));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_outcome);

        if outcome {
            Ok(())
        } else {
            Err(BackendError::Unavailable {
                backend: self.name.clone(),
                reason: "scripted failure".to_string(),
            })
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Configuration with millisecond-scale delays for fast tests
pub fn fast_config() -> DispatcherConfig {
    DispatcherConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        },
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(50),
            use_jitter: false,
        },
        attempt_timeout: Duration::from_secs(5),
        tick_interval: Duration::from_millis(10),
        metrics_interval: Duration::from_millis(10),
        ..DispatcherConfig::default()
    }
}

pub fn content(n: usize) -> EmailContent {
    EmailContent::new(
        format!("user{n}@example.com"),
        "sender@example.com",
        format!("Subject {n}"),
        "Body",
    )
}

pub fn as_backends(backends: &[Arc<ScriptedBackend>]) -> Vec<Arc<dyn DeliveryBackend>> {
    backends
        .iter()
        .map(|b| Arc::clone(b) as Arc<dyn DeliveryBackend>)
        .collect()
}
