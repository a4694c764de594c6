// src/dispatcher/mod.rs

//! The dispatch engine.
//!
//! Owns the FIFO queue, the delivery records, the idempotency index and the
//! metrics store behind one lock, and drives each backend through its
//! circuit breaker. A single background loop delivers one email at a time;
//! everything else (submission, status and metrics reads) only touches the
//! shared state long enough to copy or insert.
//!
//! ```plaintext
//!  submit ──► [idempotency index] ──► queue ──► dispatch loop (1 in flight)
//!                                                   │
//!                      for each backend, in priority order:
//!                      breaker.execute(retry_with_backoff(send))
//!                                                   │
//!                           first success ──► Sent  │  all exhausted ──► Failed
//! ```

mod process;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{self, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::DeliveryBackend;
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::message::{DeliveryRecord, Email, EmailContent, Fingerprint};
use crate::metrics::{LogEntry, MetricsCollector, MetricsSnapshot, SystemLog};
use crate::resilience::{CircuitBreaker, CircuitState};

/// Health of a single backend as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    pub name: String,
    pub healthy: bool,
    pub circuit_state: CircuitState,
    pub consecutive_failures: usize,
}

/// Overall service health derived from the backends' health hints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Every backend reports healthy
    Active,
    /// Some but not all backends report healthy
    Degraded,
    /// No backend reports healthy
    Inactive,
}

/// A backend together with the breaker that guards it
#[derive(Debug)]
pub(crate) struct BackendSlot {
    backend: Arc<dyn DeliveryBackend>,
    breaker: CircuitBreaker,
}

/// Everything mutable the engine shares between callers and the loops
#[derive(Debug)]
pub(crate) struct EngineState {
    queue: VecDeque<Arc<Email>>,
    emails: HashMap<Uuid, Arc<Email>>,
    records: HashMap<Uuid, DeliveryRecord>,
    index: HashMap<Fingerprint, Uuid>,
    metrics: MetricsCollector,
    log: SystemLog,
}

#[derive(Debug)]
struct Shared {
    config: DispatcherConfig,
    backends: Vec<BackendSlot>,
    state: Mutex<EngineState>,
    /// Set while one email is being processed
    processing: AtomicBool,
    /// Cancel flag for the background loops
    shutdown: AtomicBool,
}

/// Handles of the background loops started by [`Dispatcher::start`]
#[derive(Debug)]
pub struct DispatcherTasks {
    pub dispatch: JoinHandle<()>,
    pub metrics: JoinHandle<()>,
}

impl DispatcherTasks {
    /// Wait for both loops to exit
    pub async fn join(self) {
        let _ = self.dispatch.await;
        let _ = self.metrics.await;
    }
}

/// Clears the in-flight flag even if processing unwinds
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Cheaply cloneable handle to one dispatch engine
#[derive(Debug, Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Create an engine over `backends`. Construction order is the priority
    /// order unless `config.backend_priority` names a different one.
    pub fn new(backends: Vec<Arc<dyn DeliveryBackend>>, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        let backends = order_backends(backends, &config.backend_priority)?;

        let slots = backends
            .into_iter()
            .map(|backend| BackendSlot {
                breaker: CircuitBreaker::new(backend.name(), config.circuit_breaker.clone()),
                backend,
            })
            .collect::<Vec<_>>();

        let state = EngineState {
            queue: VecDeque::new(),
            emails: HashMap::new(),
            records: HashMap::new(),
            index: HashMap::new(),
            metrics: MetricsCollector::new(config.response_time_samples, config.throughput_window),
            log: SystemLog::new(config.log_capacity),
        };

        info!(
            backends = ?slots.iter().map(|s| s.backend.name()).collect::<Vec<_>>(),
            "Dispatcher created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                backends: slots,
                state: Mutex::new(state),
                processing: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Accept an email for delivery.
    ///
    /// Returns the new Pending record, or the existing record unchanged when
    /// identical content was submitted before. Only validation can fail.
    pub async fn submit(&self, content: EmailContent) -> Result<DeliveryRecord> {
        content.validate()?;
        let fingerprint = content.fingerprint();

        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;

        if let Some(existing) = state.index.get(&fingerprint) {
            let record = state.records.get(existing).cloned().ok_or_else(|| {
                DispatchError::Internal(format!("index points at missing record {existing}"))
            })?;
            state.log.info(format!(
                "Duplicate email detected, returning existing response: {}",
                record.id
            ));
            return Ok(record);
        }

        let email = Arc::new(Email::new(content));
        let record = DeliveryRecord::pending(&email);

        state.index.insert(fingerprint, email.id);
        state.records.insert(email.id, record.clone());
        state.emails.insert(email.id, Arc::clone(&email));
        state.queue.push_back(email);
        state.metrics.record_accepted();
        state.log.info(format!("Email {} queued for sending", record.id));

        Ok(record)
    }

    /// Current record for `id`, or None if it was never accepted
    pub async fn get_status(&self, id: &Uuid) -> Option<DeliveryRecord> {
        self.shared.state.lock().await.records.get(id).cloned()
    }

    /// The immutable request behind a record
    pub async fn get_email(&self, id: &Uuid) -> Option<Email> {
        self.shared
            .state
            .lock()
            .await
            .emails
            .get(id)
            .map(|email| Email::clone(email))
    }

    /// All records, most recently attempted first
    pub async fn list_all(&self) -> Vec<DeliveryRecord> {
        let mut records: Vec<DeliveryRecord> = {
            let state = self.shared.state.lock().await;
            state.records.values().cloned().collect()
        };
        records.sort_by(|a, b| b.last_attempt.cmp(&a.last_attempt));
        records
    }

    /// Health hint and breaker state of every backend, in priority order
    pub async fn backend_status(&self) -> Vec<BackendStatus> {
        let mut statuses = Vec::with_capacity(self.shared.backends.len());
        for slot in &self.shared.backends {
            let breaker = slot.breaker.snapshot().await;
            statuses.push(BackendStatus {
                name: slot.backend.name().to_string(),
                healthy: slot.backend.is_healthy(),
                circuit_state: breaker.state,
                consecutive_failures: breaker.consecutive_failures,
            });
        }
        statuses
    }

    pub fn service_status(&self) -> ServiceStatus {
        let healthy = self
            .shared
            .backends
            .iter()
            .filter(|slot| slot.backend.is_healthy())
            .count();

        if healthy == self.shared.backends.len() {
            ServiceStatus::Active
        } else if healthy > 0 {
            ServiceStatus::Degraded
        } else {
            ServiceStatus::Inactive
        }
    }

    /// Last snapshot published by the metrics loop
    pub async fn metrics(&self) -> MetricsSnapshot {
        self.shared.state.lock().await.metrics.snapshot().clone()
    }

    /// Recompute the snapshot now instead of waiting for the metrics loop
    pub async fn refresh_metrics(&self) -> MetricsSnapshot {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        let queue_length = state.queue.len();
        state.metrics.recompute(queue_length).clone()
    }

    /// Copy of the system log, most recent first
    pub async fn logs(&self) -> Vec<LogEntry> {
        self.shared.state.lock().await.log.entries()
    }

    pub async fn queue_len(&self) -> usize {
        self.shared.state.lock().await.queue.len()
    }

    /// True when nothing is queued and nothing is in flight
    pub async fn is_drained(&self) -> bool {
        let queue_empty = self.shared.state.lock().await.queue.is_empty();
        queue_empty && !self.shared.processing.load(Ordering::SeqCst)
    }

    /// One dispatch tick: take the head of the queue and run it to a terminal
    /// status. Does nothing (and returns false) if a delivery is already in
    /// flight or the queue is empty.
    pub async fn dispatch_next(&self) -> bool {
        if self.shared.processing.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _in_flight = InFlight(&self.shared.processing);

        let next = self.shared.state.lock().await.queue.pop_front();
        match next {
            Some(email) => {
                self.process(email).await;
                true
            }
            None => false,
        }
    }

    /// Spawn the dispatch loop and the metrics loop
    pub fn start(&self) -> DispatcherTasks {
        let dispatch = {
            let this = self.clone();
            task::spawn(async move { this.run_dispatch_loop().await })
        };
        let metrics = {
            let this = self.clone();
            task::spawn(async move { this.run_metrics_loop().await })
        };
        info!("Dispatcher started");
        DispatcherTasks { dispatch, metrics }
    }

    /// Ask both loops to stop at their next tick. A delivery already in
    /// flight runs to completion.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    async fn run_dispatch_loop(self) {
        let mut ticker = time::interval(self.shared.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.is_shutting_down() {
                break;
            }
            self.dispatch_next().await;
        }

        debug!("Dispatch loop stopped");
    }

    async fn run_metrics_loop(self) {
        let mut ticker = time::interval(self.shared.config.metrics_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.is_shutting_down() {
                break;
            }
            self.refresh_metrics().await;
        }

        debug!("Metrics loop stopped");
    }
}

/// Apply an explicit priority list: named backends first in the listed
/// order, the rest after them in construction order.
fn order_backends(
    backends: Vec<Arc<dyn DeliveryBackend>>,
    priority: &[String],
) -> Result<Vec<Arc<dyn DeliveryBackend>>> {
    if backends.is_empty() {
        return Err(DispatchError::Config(
            "at least one delivery backend is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for backend in &backends {
        if !seen.insert(backend.name().to_string()) {
            return Err(DispatchError::Config(format!(
                "duplicate backend name: {}",
                backend.name()
            )));
        }
    }

    let mut remaining = backends;
    let mut ordered = Vec::with_capacity(remaining.len());
    for name in priority {
        let position = remaining
            .iter()
            .position(|b| b.name() == name)
            .ok_or_else(|| DispatchError::Config(format!("unknown backend in priority: {name}")))?;
        ordered.push(remaining.remove(position));
    }
    ordered.extend(remaining);

    Ok(ordered)
}
