//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means "these bytes are not a valid envelope
//! or payload". It never means the network failed; that lives in the
//! engine's own error type.

/// Errors that can occur while framing or (de)serializing.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a payload failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserializing a payload failed (malformed JSON, missing fields).
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame's type tag is not a known [`MessageKind`](crate::MessageKind).
    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    /// The frame announces a payload larger than the protocol allows.
    /// Treated as a malicious or broken peer.
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// The message is well-formed but violates a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
