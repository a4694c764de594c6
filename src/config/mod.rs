// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DispatchError, Result};

/// Top-level configuration for the dispatch engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Per-backend circuit breaker settings
    pub circuit_breaker: CircuitBreakerConfig,

    /// Bounded retry settings applied to each backend
    pub retry: RetryConfig,

    /// Upper bound on a single backend call
    #[serde(with = "duration_serde")]
    pub attempt_timeout: Duration,

    /// Cadence of the dispatch loop
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// Cadence of the metrics recompute loop
    #[serde(with = "duration_serde")]
    pub metrics_interval: Duration,

    /// Explicit backend order by name; empty keeps construction order
    pub backend_priority: Vec<String>,

    /// Maximum number of system log entries kept
    pub log_capacity: usize,

    /// Maximum number of response time samples kept
    pub response_time_samples: usize,

    /// Window used for the accepted-requests counter
    #[serde(with = "duration_serde")]
    pub throughput_window: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            attempt_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_millis(1000),
            metrics_interval: Duration::from_millis(5000),
            backend_priority: Vec::new(),
            log_capacity: 100,
            response_time_samples: 100,
            throughput_window: Duration::from_secs(60),
        }
    }
}

impl DispatcherConfig {
    /// Build a configuration from `DISPATCH_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`DispatcherConfig::from_env`], reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var::<usize, _>(&lookup, "DISPATCH_FAILURE_THRESHOLD")? {
            config.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "DISPATCH_RESET_TIMEOUT_MS")? {
            config.circuit_breaker.reset_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "DISPATCH_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "DISPATCH_BACKOFF_BASE_MS")? {
            config.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "DISPATCH_ATTEMPT_TIMEOUT_MS")? {
            config.attempt_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "DISPATCH_TICK_MS")? {
            config.tick_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "DISPATCH_METRICS_MS")? {
            config.metrics_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "DISPATCH_LOG_CAPACITY")? {
            config.log_capacity = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "DISPATCH_RESPONSE_SAMPLES")? {
            config.response_time_samples = v;
        }
        if let Some(raw) = lookup("DISPATCH_BACKEND_PRIORITY") {
            config.backend_priority = raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document, applying defaults for missing fields
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(config_error("circuit_breaker.failure_threshold must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error("retry.max_attempts must be at least 1"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(config_error("retry.multiplier must be >= 1.0"));
        }
        if self.tick_interval.is_zero() || self.metrics_interval.is_zero() {
            return Err(config_error("loop intervals must be non-zero"));
        }
        if self.attempt_timeout.is_zero() {
            return Err(config_error("attempt_timeout must be non-zero"));
        }
        if self.log_capacity == 0 || self.response_time_samples == 0 {
            return Err(config_error("log and sample capacities must be non-zero"));
        }
        Ok(())
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: usize,
    /// Cool-down before an open circuit lets a trial call through
    #[serde(with = "duration_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Configuration for the per-backend retry strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of calls to one backend for one request
    pub max_attempts: usize,
    /// Base unit of the backoff delay
    #[serde(with = "duration_serde")]
    pub base_delay: Duration,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Cap on a single backoff delay
    #[serde(with = "duration_serde")]
    pub max_delay: Duration,
    /// Whether to add jitter to backoff
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            use_jitter: false,
        }
    }
}

/// Configuration for a simulated delivery backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockBackendConfig {
    /// Name reported in status views and records
    pub name: String,

    /// Probability in [0, 1] that a send fails
    #[serde(default)]
    pub failure_rate: f64,

    /// Upper bound of the simulated network delay
    #[serde(default, with = "duration_serde")]
    pub max_latency: Duration,

    /// Start in the down state
    #[serde(default)]
    pub down: bool,
}

impl MockBackendConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_rate: 0.0,
            max_latency: Duration::ZERO,
            down: false,
        }
    }

    /// First stock provider: 30% failures, up to one second of latency
    pub fn provider_a() -> Self {
        Self {
            name: "Mock Email Provider A".to_string(),
            failure_rate: 0.3,
            max_latency: Duration::from_millis(1000),
            down: false,
        }
    }

    /// Second stock provider: 20% failures, up to 800ms of latency
    pub fn provider_b() -> Self {
        Self {
            name: "Mock Email Provider B".to_string(),
            failure_rate: 0.2,
            max_latency: Duration::from_millis(800),
            down: false,
        }
    }
}

fn config_error(msg: &str) -> DispatchError {
    DispatchError::Config(msg.to_string())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| DispatchError::Config(format!("{key}={raw:?}: {e}"))),
        None => Ok(None),
    }
}

// Helper module to serialize/deserialize Duration with serde
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
