//! Unified error type for the HOO server.

use hoo_net::NetworkError;
use hoo_protocol::ProtocolError;
use hoo_session::SessionError;

/// Top-level error that wraps all crate-specific errors.
///
/// `#[from]` on each variant lets `?` convert sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum HooError {
    /// Socket setup failed (bind, listen, resolve, host address).
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// The global tracing subscriber could not be installed.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}
