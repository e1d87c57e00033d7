//! Core protocol types: session identity and the engine envelope.
//!
//! A [`Message`] is the unit the network engine moves around. It is NOT an
//! application message: it is the envelope that carries one. The engine
//! only ever looks at the [`MessageKind`] tag and the [`SessionId`]; the
//! payload bytes belong to whoever consumes the message.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Identifies one connection slot (and the session bound to it).
///
/// Session ids are small non-negative integers that double as indices
/// into the connection pool and the session arrays. They are stable for
/// the lifetime of one connection and get reused once the slot is freed.
///
/// `-1` ([`SessionId::NONE`]) means "no session": it is what a peer sees
/// in the rejection envelope when the pool is full, because no real slot
/// was ever handed out.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub i32);

impl SessionId {
    /// The "no session" sentinel.
    pub const NONE: SessionId = SessionId(-1);

    /// Builds a session id from a pool index.
    ///
    /// Pool sizes are bounded far below `i32::MAX`, so the cast never
    /// truncates for a real index.
    pub fn from_index(index: usize) -> Self {
        Self(index as i32)
    }

    /// Returns the pool index for this id, or `None` for negative ids.
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }

    /// Returns `true` if `0 <= self < max_sessions`.
    pub fn is_valid_for(self, max_sessions: usize) -> bool {
        self.index().is_some_and(|i| i < max_sessions)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The envelope type tag.
///
/// The discriminants are the on-wire byte values, so they must never be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// A peer connected and got a session slot.
    /// Synthesized by the engine, never read off the wire from a server.
    OpenSession = 0,

    /// The session is over. Inbound: the peer disconnected or timed out.
    /// Outbound (via `send_message`): close this peer's connection.
    CloseSession = 1,

    /// Carries an application payload.
    Application = 2,

    /// Sent to a peer that was refused because every slot is taken.
    MaxConnectionsReached = 3,
}

impl MessageKind {
    /// The wire byte for this kind.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::OpenSession),
            1 => Ok(Self::CloseSession),
            2 => Ok(Self::Application),
            3 => Ok(Self::MaxConnectionsReached),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenSession => write!(f, "OpenSession"),
            Self::CloseSession => write!(f, "CloseSession"),
            Self::Application => write!(f, "Application"),
            Self::MaxConnectionsReached => write!(f, "MaxConnectionsReached"),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// The engine-level envelope: type tag, session id, opaque payload.
///
/// `Message` is a plain value. When it crosses the inbound queue the
/// consumer takes ownership of the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub session_id: SessionId,
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates an envelope with an empty payload.
    pub fn new(kind: MessageKind, session_id: SessionId) -> Self {
        Self {
            kind,
            session_id,
            payload: Vec::new(),
        }
    }

    /// An open-session notification for `session_id`.
    pub fn open_session(session_id: SessionId) -> Self {
        Self::new(MessageKind::OpenSession, session_id)
    }

    /// A close-session notification (inbound) or request (outbound).
    pub fn close_session(session_id: SessionId) -> Self {
        Self::new(MessageKind::CloseSession, session_id)
    }

    /// An application envelope carrying `payload`.
    pub fn application(session_id: SessionId, payload: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Application,
            session_id,
            payload,
        }
    }

    /// The rejection sent to a peer when the pool is full.
    pub fn max_connections_reached() -> Self {
        Self::new(MessageKind::MaxConnectionsReached, SessionId::NONE)
    }

    /// Returns `true` for close-session envelopes.
    pub fn is_close(&self) -> bool {
        self.kind == MessageKind::CloseSession
    }
}

// ---------------------------------------------------------------------------
// UserNotice: payloads the session layer produces on its own
// ---------------------------------------------------------------------------

/// Why the server is telling a user about maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MaintenanceKind {
    /// The user's own account was locked by an administrator.
    UserAccount,
    /// The whole server is going down.
    ServerShutdown,
}

/// Server → user notices emitted by the session managers.
///
/// Everything else that goes into an application payload is produced by
/// the application protocols; these two are the only ones the admin
/// operations need to send themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserNotice {
    /// Maintenance warning. `seconds` is the delay before it takes effect
    /// (0 = now).
    Maintenance { kind: MaintenanceKind, seconds: i32 },

    /// Free text from an administrator.
    AdminMessage { text: String },
}
