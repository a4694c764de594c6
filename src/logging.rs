use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,email_dispatcher=trace
pub fn init() {
    init_with_default("info");
}

/// Same as [`init`], but with a caller supplied fallback directive used when
/// RUST_LOG is not set.
pub fn init_with_default(default_directive: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true) // the dispatch loop and callers run on different workers
                    .with_line_number(true),
            )
            .init();

        tracing::info!("Logging initialized");
    });
}

/// Macro for logging the outcome of one backend stage of a delivery
#[macro_export]
macro_rules! delivery_event {
    ($email_id:expr, $backend:expr, $outcome:expr, $attempts:expr) => {
        tracing::info!(
            email_id = %$email_id,
            backend = $backend,
            outcome = $outcome,
            attempts = $attempts,
            "Delivery stage finished"
        )
    };
}

/// Macro for logging circuit breaker state changes
#[macro_export]
macro_rules! breaker_transition {
    ($backend:expr, $from:expr, $to:expr) => {
        tracing::warn!(
            backend = $backend,
            from = ?$from,
            to = ?$to,
            "Circuit breaker transition"
        )
    };
}
