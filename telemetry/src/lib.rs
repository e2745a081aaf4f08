//! Tracing setup shared by services and tests.

use std::sync::Once;

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError};

// Guards the global subscriber installation for tests. Installing twice fails,
// and every test calls [`init_test_tracing`] first.
static TEST_TRACING: Once = Once::new();

/// Error returned when the global tracing subscriber cannot be installed.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to install the tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Initializes tracing for a service.
///
/// The filter is read from `RUST_LOG`, falling back to `info` for the given
/// service name when the variable is not set.
pub fn init_tracing(service_name: &str) -> Result<(), TracingError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{service_name}=info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Initializes tracing for tests.
///
/// Safe to call from every test. The subscriber is installed once and writes
/// through the test writer so output is captured per test.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .init();
    });
}
