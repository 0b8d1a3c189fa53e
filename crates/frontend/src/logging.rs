//! Log subscriber bootstrap

use crate::FrontendError;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`)
pub fn init_logging() -> Result<(), FrontendError> {
    init_logging_with("info")
}

/// Install the fmt subscriber with a fallback filter directive
///
/// Fails if the directive does not parse or a global subscriber is already
/// installed.
pub fn init_logging_with(default_directive: &str) -> Result<(), FrontendError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|e| FrontendError::Logging(e.to_string()))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| FrontendError::Logging(e.to_string()))
}
