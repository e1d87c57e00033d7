//! Wire protocol for the HOO session engine.
//!
//! This crate defines what travels between a peer and a `NetworkEngine`:
//!
//! - **Types** ([`SessionId`], [`MessageKind`], [`Message`]): the
//!   engine-level envelope. Its payload is opaque here; the account,
//!   match-making, chat and admin protocols own its interpretation.
//! - **Frames** ([`frame`]): how an envelope is laid out on a TCP stream.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how the few payloads the
//!   session layer produces itself ([`UserNotice`]) become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! TCP stream (bytes) → frame (Message) → session managers (SessionId context)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
pub mod frame;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    MaintenanceKind, Message, MessageKind, SessionId, UserNotice,
};
