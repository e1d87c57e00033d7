//! Payload codecs.
//!
//! A codec turns a typed payload into the opaque bytes an application
//! envelope carries, and back. Callers depend on the [`Codec`] trait so
//! the payload format can change without touching the session layer.
//!
//! The engine envelope itself is framed by hand (see [`crate::frame`]);
//! codecs are for the payloads inside it. The session layer only needs one
//! ([`JsonCodec`]) for the notices it sends on its own.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Encodes typed payloads to bytes and decodes them back.
///
/// - `Send + Sync` → the codec is shared by every manager and dispatch task.
/// - `'static` → it lives in long-lived server state.
///
/// `decode` requires `DeserializeOwned` so the decoded value does not
/// borrow from the receive buffer, which the engine reuses.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON keeps the notices readable in packet captures and logs. This is
/// behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use hoo_protocol::{Codec, JsonCodec, MaintenanceKind, UserNotice};
///
/// let codec = JsonCodec;
///
/// let notice = UserNotice::Maintenance {
///     kind: MaintenanceKind::ServerShutdown,
///     seconds: 300,
/// };
///
/// let bytes = codec.encode(&notice).unwrap();
/// let decoded: UserNotice = codec.decode(&bytes).unwrap();
/// assert_eq!(notice, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
