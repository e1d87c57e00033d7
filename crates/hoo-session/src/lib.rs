//! Session management for the HOO server.
//!
//! This crate sits between the network engines and the application
//! protocols:
//!
//! 1. **Sessions** ([`Session`]): one per connection slot, holding login
//!    state, match-making status and the current game.
//! 2. **Shared state** ([`ServerData`]): the session arrays, the opened
//!    lists, the match-making queue, the shutdown schedule, the account
//!    repository, and the two engines' outbound seams.
//! 3. **Managers** ([`UserSessionManager`], [`AdminSessionManager`]):
//!    open/close/login/logout plus the admin and match-making operations.
//! 4. **Accounts** ([`AccountRepository`]): where accounts persist.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server dispatch (above)  ← routes engine messages to the managers
//!     ↕
//! Session layer (this crate)  ← who is connected, logged in, waiting
//!     ↕
//! Network layer (below)  ← MessageSink for outbound envelopes
//! ```
//!
//! # Errors
//!
//! Only two things are errors here: a session id that does not exist and
//! a capacity limit. Both come back as [`SessionError`], which says how
//! the peer should be disconnected. Authentication outcomes are answer
//! enums.

mod account;
mod admin;
mod config;
mod data;
mod error;
mod matcher;
mod session;
mod user;

pub use account::{
    is_valid_login, is_valid_mail, is_valid_password, AccountInfos, AccountRepository, Ban,
    ConnectAnswer, CreateAccountAnswer, LoginAnswer, LoginAvailability, LoginRefusal,
    MemoryAccountRepository, UserAccount,
};
pub use admin::{AdminSessionManager, UserInfo};
pub use config::{AdminCredentials, SessionConfig};
pub use data::{ServerData, ShutdownSchedule};
pub use error::{DisconnectReason, SessionError};
pub use matcher::PlayerMatcher;
pub use session::{GameLink, QuickMatchStatus, Session, SessionState};
pub use user::UserSessionManager;

use hoo_protocol::{Codec, JsonCodec, Message, SessionId, UserNotice};

/// Wraps a notice in an application envelope for `id`.
///
/// Returns `None` (and logs) if the notice cannot be encoded.
pub(crate) fn notice_message(id: SessionId, notice: &UserNotice) -> Option<Message> {
    match JsonCodec.encode(notice) {
        Ok(payload) => Some(Message::application(id, payload)),
        Err(e) => {
            tracing::warn!(session = %id, error = %e, "failed to encode user notice");
            None
        }
    }
}
