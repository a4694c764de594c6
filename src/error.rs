// for error definitions
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// Submission content was rejected before a request was created
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons a submission is refused synchronously
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was empty or whitespace only
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Recipient or sender is not a plausible address
    #[error("Invalid email address in {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },
}

/// Failure of a single delivery attempt against one backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend refused or failed to deliver
    #[error("{backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    /// The attempt did not finish within the configured bound
    #[error("{backend} timed out after {after:?}")]
    Timeout { backend: String, after: Duration },
}

/// Errors returned by a circuit breaker around a backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BreakerError {
    /// The breaker rejected the call without invoking the backend
    #[error("Circuit open for {backend}")]
    Open { backend: String },

    /// The guarded operation ran and failed
    #[error(transparent)]
    Failed(BackendError),
}

impl BreakerError {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Config(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, DispatchError>;
