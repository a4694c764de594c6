use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::breaker_transition;
use crate::config::CircuitBreakerConfig;
use crate::error::{BackendError, BreakerError};

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected without reaching the backend
    Open,
    /// A single trial request is probing whether the backend recovered
    HalfOpen,
}

/// Point-in-time view of a breaker, for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub last_transition: DateTime<Utc>,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: usize,
    /// Monotonic time the circuit last opened; drives the cool-down
    opened_at: Option<Instant>,
    /// Set while the half-open trial call is running
    trial_in_flight: bool,
    last_transition: DateTime<Utc>,
    last_failure: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn transition(&mut self, backend: &str, to: CircuitState) {
        if self.state != to {
            breaker_transition!(backend, self.state, to);
            self.state = to;
            self.last_transition = Utc::now();
        }
    }

    /// The half-open trial did not succeed: reopen and restart the cool-down
    fn reopen(&mut self, backend: &str) {
        self.failure_count += 1;
        self.trial_in_flight = false;
        self.last_failure = Some(Utc::now());
        self.opened_at = Some(Instant::now());
        self.transition(backend, CircuitState::Open);
    }

    fn settle_abandoned_trial(&mut self, backend: &str) {
        if self.state == CircuitState::HalfOpen && self.trial_in_flight {
            self.reopen(backend);
        }
    }
}

enum Admission {
    Rejected,
    Normal,
    Trial,
}

/// Counts a trial call that never reported back (dropped or panicked) as a
/// failed trial
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}

/// Circuit breaker guarding one delivery backend
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Backend name, used in errors and logs
    name: String,
    /// All mutable state behind one lock so readers never see a torn update
    inner: RwLock<BreakerInner>,
    /// Set when an abandoned trial could not take the lock; settled by the next call
    trial_abandoned: AtomicBool,
    /// Configuration for the circuit breaker
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                trial_in_flight: false,
                last_transition: Utc::now(),
                last_failure: None,
            }),
            trial_abandoned: AtomicBool::new(false),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` if the breaker permits it, recording the outcome.
    ///
    /// A rejected call returns [`BreakerError::Open`] without invoking
    /// `operation`; a failed call returns [`BreakerError::Failed`].
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let trial = match self.admit().await {
            Admission::Rejected => {
                return Err(BreakerError::Open {
                    backend: self.name.clone(),
                })
            }
            Admission::Normal => false,
            Admission::Trial => true,
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };
        let outcome = operation().await;
        guard.armed = false;

        match outcome {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(BreakerError::Failed(e))
            }
        }
    }

    /// Check if the circuit breaker allows the request to proceed.
    ///
    /// Once the cool-down has elapsed an open circuit admits exactly one
    /// trial call and moves to half-open for its duration.
    pub async fn allow_request(&self) -> bool {
        !matches!(self.admit().await, Admission::Rejected)
    }

    async fn admit(&self) -> Admission {
        let mut inner = self.inner.write().await;
        if self.trial_abandoned.swap(false, Ordering::SeqCst) {
            inner.settle_abandoned_trial(&self.name);
        }

        match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);

                if cooled_down {
                    inner.transition(&self.name, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    debug!(backend = %self.name, "Trial call already in flight, rejecting");
                    Admission::Rejected
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    // Drop runs outside async context, so the lock can only be tried
    fn abandon_trial(&self) {
        match self.inner.try_write() {
            Ok(mut inner) => inner.settle_abandoned_trial(&self.name),
            Err(_) => self.trial_abandoned.store(true, Ordering::SeqCst),
        }
    }

    /// Record a successful operation
    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.failure_count = 0;
                inner.trial_in_flight = false;
                inner.opened_at = None;
                inner.transition(&self.name, CircuitState::Closed);
            }
            CircuitState::Open => {
                // Only reachable if a caller bypassed allow_request
                debug!(backend = %self.name, "Received success in Open state");
            }
        }
    }

    /// Record a failed operation
    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.last_failure = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;

                if inner.failure_count >= self.config.failure_threshold {
                    inner.opened_at = Some(Instant::now());
                    inner.transition(&self.name, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // Failed trial: restart the cool-down
                inner.reopen(&self.name);
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state of the circuit breaker. Never changes state.
    pub async fn get_state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Read-only view including counters and timestamps
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.read().await;
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.failure_count,
            last_transition: inner.last_transition,
            last_failure: inner.last_failure,
        }
    }
}
