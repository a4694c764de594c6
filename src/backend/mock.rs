// src/backend/mock.rs

// Simulated transport used by the demo binaries and for exercising the
// resilience logic. Fails at a configurable rate after a random delay.
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::backend::DeliveryBackend;
use crate::config::MockBackendConfig;
use crate::error::BackendError;
use crate::message::Email;

/// In-process backend with a tunable failure rate
#[derive(Debug)]
pub struct MockBackend {
    config: MockBackendConfig,
    down: AtomicBool,
    sent: AtomicU64,
}

impl MockBackend {
    pub fn new(config: MockBackendConfig) -> Self {
        let down = AtomicBool::new(config.down);
        Self {
            config,
            down,
            sent: AtomicU64::new(0),
        }
    }

    /// Simulate the provider going down (or coming back)
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of successful sends so far
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    fn simulated_latency(&self) -> Duration {
        let max_ms = self.config.max_latency.as_millis() as f64;
        Duration::from_millis((rand::random::<f64>() * max_ms) as u64)
    }
}

#[async_trait]
impl DeliveryBackend for MockBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn send(&self, email: &Email) -> Result<(), BackendError> {
        info!("{} attempting to send email {}", self.config.name, email.id);

        let latency = self.simulated_latency();
        if !latency.is_zero() {
            time::sleep(latency).await;
        }

        let failed = self.down.load(Ordering::SeqCst)
            || rand::random::<f64>() < self.config.failure_rate;

        if failed {
            error!("{} failed to send email {}", self.config.name, email.id);
            return Err(BackendError::Unavailable {
                backend: self.config.name.clone(),
                reason: "service unavailable".to_string(),
            });
        }

        self.sent.fetch_add(1, Ordering::SeqCst);
        info!("{} successfully sent email {}", self.config.name, email.id);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }
}
