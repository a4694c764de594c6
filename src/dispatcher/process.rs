// src/dispatcher/process.rs

// Backend fallback for one email: each backend gets its full retry budget
// behind its breaker before the next one is tried.
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{self, Instant};

use super::{BackendSlot, Dispatcher, EngineState};
use crate::backend::DeliveryBackend;
use crate::delivery_event;
use crate::error::{BackendError, BreakerError};
use crate::message::{DeliveryRecord, DeliveryStatus, Email};
use crate::resilience::{retry_with_backoff, CircuitState};

impl EngineState {
    fn record_mut(&mut self, id: &uuid::Uuid) -> Option<&mut DeliveryRecord> {
        self.records.get_mut(id)
    }
}

impl Dispatcher {
    /// Drive one dequeued email to Sent or Failed
    pub(super) async fn process(&self, email: Arc<Email>) {
        let started = Instant::now();

        {
            let mut state = self.shared.state.lock().await;
            match state.record_mut(&email.id) {
                Some(record) => {
                    record.status = DeliveryStatus::Retrying;
                    record.last_attempt = Utc::now();
                }
                None => {
                    state
                        .log
                        .error(format!("No delivery record for queued email {}", email.id));
                    return;
                }
            }
        }

        for slot in &self.shared.backends {
            let name = slot.backend.name();

            let attempts = {
                let mut state = self.shared.state.lock().await;
                match state.record_mut(&email.id) {
                    Some(record) => {
                        record.attempts += 1;
                        record.provider = name.to_string();
                        record.last_attempt = Utc::now();
                        record.attempts
                    }
                    None => 0,
                }
            };

            let before = slot.breaker.get_state().await;
            let result = slot
                .breaker
                .execute(|| self.send_with_retry(&email, slot))
                .await;
            let after = slot.breaker.get_state().await;

            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;

            if before != after {
                state.log.warn(format!(
                    "Circuit breaker for {} moved from {:?} to {:?}",
                    name, before, after
                ));
            } else if before == CircuitState::Open
                && matches!(result, Err(BreakerError::Failed(_)))
            {
                state
                    .log
                    .warn(format!("Trial call to {} failed, circuit reopened", name));
            }

            match result {
                Ok(()) => {
                    if let Some(record) = state.record_mut(&email.id) {
                        record.status = DeliveryStatus::Sent;
                        record.last_attempt = Utc::now();
                    }
                    state.metrics.record_sent(started.elapsed());
                    state
                        .log
                        .info(format!("Email {} sent successfully via {}", email.id, name));
                    delivery_event!(email.id, name, "sent", attempts);
                    return;
                }
                Err(e) => {
                    if let Some(record) = state.record_mut(&email.id) {
                        record.error = Some(e.to_string());
                    }
                    match &e {
                        BreakerError::Open { .. } => {
                            state.log.warn(format!(
                                "Skipping {} for email {}: circuit open",
                                name, email.id
                            ));
                            delivery_event!(email.id, name, "circuit_open", attempts);
                        }
                        BreakerError::Failed(cause) => {
                            state.log.error(format!(
                                "Provider {} failed for email {}: {}",
                                name, email.id, cause
                            ));
                            delivery_event!(email.id, name, "failed", attempts);
                        }
                    }
                }
            }
        }

        let mut state = self.shared.state.lock().await;
        if let Some(record) = state.record_mut(&email.id) {
            record.status = DeliveryStatus::Failed;
            record.last_attempt = Utc::now();
        }
        state.metrics.record_failed();
        state
            .log
            .error(format!("All providers failed for email {}", email.id));
    }

    /// Bounded retries against one backend, each call capped by the attempt timeout
    async fn send_with_retry(&self, email: &Email, slot: &BackendSlot) -> Result<(), BackendError> {
        let backend: &dyn DeliveryBackend = slot.backend.as_ref();
        let timeout = self.shared.config.attempt_timeout;
        let label = format!("email {} via {}", email.id, backend.name());

        retry_with_backoff(&self.shared.config.retry, &label, move |_attempt| async move {
            match time::timeout(timeout, backend.send(email)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout {
                    backend: backend.name().to_string(),
                    after: timeout,
                }),
            }
        })
        .await
    }
}
