// library entry
pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod resilience;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use backend::{DeliveryBackend, MockBackend};
pub use config::{DispatcherConfig, MockBackendConfig};
pub use dispatcher::{BackendStatus, Dispatcher, DispatcherTasks, ServiceStatus};
pub use error::{BackendError, BreakerError, DispatchError, Result, ValidationError};
pub use logging::init as init_logging;
pub use message::{DeliveryRecord, DeliveryStatus, Email, EmailContent};
pub use metrics::{LogEntry, LogLevel, MetricsSnapshot};
pub use resilience::CircuitState;
