//! Application hooks for the dispatch loops.
//!
//! The engines and managers handle connection bookkeeping on their own.
//! What a payload means is up to the application: the dispatch loops hand
//! every application envelope to a [`MessageHandler`], together with the
//! manager for the port it arrived on.

use std::future::Future;

use hoo_protocol::{Message, SessionId};
use hoo_session::{AccountRepository, AdminSessionManager, SessionError, UserSessionManager};

/// Application-level message handling for both ports.
///
/// Returning [`SessionError`] from a handler disconnects the sender; the
/// error's [`DisconnectReason`](hoo_session::DisconnectReason) decides
/// whether the peer is told that the server is full first.
pub trait MessageHandler<R: AccountRepository>: Send + Sync + 'static {
    /// An application envelope from the user port.
    fn handle_user_message(
        &self,
        users: &UserSessionManager<R>,
        message: Message,
    ) -> impl Future<Output = Result<(), SessionError>> + Send {
        let _ = users;
        async move {
            tracing::debug!(
                session = %message.session_id,
                len = message.payload.len(),
                "unhandled user message"
            );
            Ok(())
        }
    }

    /// An application envelope from the admin port.
    fn handle_admin_message(
        &self,
        admin: &AdminSessionManager<R>,
        message: Message,
    ) -> impl Future<Output = Result<(), SessionError>> + Send {
        let _ = admin;
        async move {
            tracing::debug!(
                session = %message.session_id,
                len = message.payload.len(),
                "unhandled admin message"
            );
            Ok(())
        }
    }

    /// Two waiting players were paired by the matcher. Both are already
    /// back to not-waiting; starting the game is up to the handler.
    fn on_players_matched(&self, first: SessionId, second: SessionId) {
        tracing::debug!(%first, %second, "players matched");
    }
}

/// A handler that ignores every application message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHandler;

impl<R: AccountRepository> MessageHandler<R> for NullHandler {}
