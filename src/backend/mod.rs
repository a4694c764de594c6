// src/backend/mod.rs

pub mod mock;

pub use mock::MockBackend;

use crate::error::BackendError;
use crate::message::Email;
use async_trait::async_trait;
use std::fmt::Debug;

/// Core trait that every delivery transport must implement.
///
/// The engine owns retry policy; an implementation makes exactly one attempt
/// per `send` call and reports failure through `BackendError`.
#[async_trait]
pub trait DeliveryBackend: Send + Sync + Debug {
    // Name used in records, logs and priority configuration
    fn name(&self) -> &str;

    // Attempts one delivery of one email
    async fn send(&self, email: &Email) -> Result<(), BackendError>;

    // Cheap, non-blocking liveness hint; independent of circuit state
    fn is_healthy(&self) -> bool;
}
