//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the level passed in, so operators can raise the
//! verbosity of one module (`RUST_LOG=hoo_net=debug`) without a rebuild.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::HooError;

/// Installs a human-readable subscriber at `level` ("info", "debug", ...).
///
/// # Errors
/// [`HooError::Logging`] if a global subscriber is already installed.
pub fn setup_logging(level: &str) -> Result<(), HooError> {
    setup_logging_with_format(level, false)
}

/// Same as [`setup_logging`], with JSON lines when `json_format` is set.
pub fn setup_logging_with_format(level: &str, json_format: bool) -> Result<(), HooError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    };
    result.map_err(|e| HooError::Logging(e.to_string()))
}
