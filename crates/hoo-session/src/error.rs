//! Error types for the session layer.

use std::fmt;

use hoo_protocol::SessionId;

/// Why a peer has to be disconnected.
///
/// The two reasons are kept apart because they call for different
/// handling: a capacity limit is nobody's fault and the peer may retry
/// later, while a bad session id means the peer (or the caller) is not
/// speaking the protocol and should be dropped at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    WrongProtocol,
    MaximumConnectionReached,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongProtocol => write!(f, "wrong protocol"),
            Self::MaximumConnectionReached => write!(f, "maximum connection reached"),
        }
    }
}

/// Errors raised by the session managers.
///
/// Expected authentication outcomes (bad password, banned account, ...)
/// are NOT errors; they come back as answer enums.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The peer must be disconnected.
    #[error("{reason}: {message}")]
    Disconnect {
        reason: DisconnectReason,
        message: String,
    },

    /// A session id outside `0..max_sessions`.
    #[error("invalid session id {0}")]
    InvalidSessionId(SessionId),
}

impl SessionError {
    pub(crate) fn wrong_protocol(message: impl Into<String>) -> Self {
        Self::Disconnect {
            reason: DisconnectReason::WrongProtocol,
            message: message.into(),
        }
    }

    pub(crate) fn maximum_connection_reached() -> Self {
        Self::Disconnect {
            reason: DisconnectReason::MaximumConnectionReached,
            message: "Maximum connection reached.".into(),
        }
    }

    /// The disconnect this error calls for.
    ///
    /// An invalid id counts as a protocol violation.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Self::Disconnect { reason, .. } => *reason,
            Self::InvalidSessionId(_) => DisconnectReason::WrongProtocol,
        }
    }
}
