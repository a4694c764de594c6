// src/resilience/mod.rs
//! Resilience features for the dispatch engine.
//!
//! Each delivery backend is wrapped in two layers:
//!
//! 1. **Retry with Exponential Backoff** - the backend is called a bounded number
//!    of times per email, sleeping between failures
//! 2. **Circuit Breaking** - once a backend keeps failing, calls to it are
//!    rejected outright until a cool-down has elapsed and a trial call succeeds
//!
//! Fallback across backends is the dispatcher's job; see `dispatcher::process`.

mod circuit_breaker;
mod exponential_backoff;

#[cfg(test)]
mod tests;

// Re-export key components
pub use crate::config::{CircuitBreakerConfig, RetryConfig};
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use exponential_backoff::{retry_with_backoff, ExponentialBackoff};
