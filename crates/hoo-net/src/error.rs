use std::io;

/// Setup errors raised by the network engine.
///
/// These are the only failures the engine reports to its caller. Anything
/// that goes wrong with an individual connection once the loop is running
/// becomes a close-session message instead.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// `open` was called while the listening socket is already open.
    #[error("server socket already opened")]
    AlreadyOpen,

    /// The local address could not be resolved.
    #[error("failed to resolve address {address:?}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Creating, configuring, binding, or listening on a socket failed.
    #[error("failed to {stage} the server socket: {source}")]
    SocketSetup {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    /// Every connection slot is taken (outbound dial only; inbound peers
    /// are rejected with a message instead).
    #[error("the maximum number of simultaneous connections has been reached")]
    PoolExhausted,

    /// The host's own address could not be determined.
    #[error("error retrieving host address: {0}")]
    HostAddress(#[source] io::Error),
}
