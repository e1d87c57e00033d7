//! Per-connection application state.
//!
//! A [`Session`] exists for every pool slot from startup and is reused
//! across connections: opening resets it, closing resets it again. All of
//! its fields live behind the session's own lock, which is never taken
//! while a list lock of [`ServerData`](crate::ServerData) is held.

use std::fmt;
use std::sync::Arc;

use hoo_protocol::SessionId;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::UserAccount;

// ---------------------------------------------------------------------------
// QuickMatchStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuickMatchStatus {
    #[default]
    NotWaiting,
    LookingForOpponent,
}

// ---------------------------------------------------------------------------
// GameLink
// ---------------------------------------------------------------------------

/// The game a session is currently playing in.
///
/// Only the disconnect hook matters to the session layer; everything else
/// about a game is the game's business.
pub trait GameLink: Send + Sync + 'static {
    /// The player on `session_id` is gone.
    fn on_player_disconnection(&self, session_id: SessionId);
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The mutable part of a session.
#[derive(Default)]
pub struct SessionState {
    opened: bool,
    account: Option<UserAccount>,
    quick_match: QuickMatchStatus,
    game: Option<Arc<dyn GameLink>>,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("opened", &self.opened)
            .field("account", &self.account.as_ref().map(|a| &a.login))
            .field("quick_match", &self.quick_match)
            .field("in_game", &self.game.is_some())
            .finish()
    }
}

impl SessionState {
    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn is_logged_in(&self) -> bool {
        self.account.is_some()
    }

    pub fn account(&self) -> Option<&UserAccount> {
        self.account.as_ref()
    }

    pub fn account_mut(&mut self) -> Option<&mut UserAccount> {
        self.account.as_mut()
    }

    /// The logged-in login, if any.
    pub fn login_name(&self) -> Option<&str> {
        self.account.as_ref().map(|a| a.login.as_str())
    }

    pub fn quick_match_status(&self) -> QuickMatchStatus {
        self.quick_match
    }

    pub fn set_quick_match_status(&mut self, status: QuickMatchStatus) {
        self.quick_match = status;
    }

    pub fn game(&self) -> Option<&Arc<dyn GameLink>> {
        self.game.as_ref()
    }

    pub fn set_game(&mut self, game: Option<Arc<dyn GameLink>>) {
        self.game = game;
    }

    pub(crate) fn take_game(&mut self) -> Option<Arc<dyn GameLink>> {
        self.game.take()
    }

    pub(crate) fn open(&mut self) {
        *self = Self {
            opened: true,
            ..Self::default()
        };
    }

    pub(crate) fn close(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn login(&mut self, account: UserAccount) {
        self.account = Some(account);
    }

    /// Forgets the account and any match-making state.
    pub(crate) fn logout(&mut self) -> Option<UserAccount> {
        self.quick_match = QuickMatchStatus::NotWaiting;
        self.game = None;
        self.account.take()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Takes the session lock.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_resets_previous_state() {
        let session = Session::new(SessionId(2));
        {
            let mut state = session.lock().await;
            state.login(UserAccount::new("alice", "p", "a@b"));
            state.set_quick_match_status(QuickMatchStatus::LookingForOpponent);
            state.open();
        }
        let state = session.lock().await;
        assert!(state.is_opened());
        assert!(!state.is_logged_in());
        assert_eq!(state.quick_match_status(), QuickMatchStatus::NotWaiting);
    }

    #[tokio::test]
    async fn test_logout_returns_account_and_clears() {
        let session = Session::new(SessionId(0));
        let mut state = session.lock().await;
        state.open();
        state.login(UserAccount::new("bob", "p", "b@c"));
        assert_eq!(state.login_name(), Some("bob"));

        let account = state.logout().unwrap();
        assert_eq!(account.login, "bob");
        assert!(!state.is_logged_in());
        assert!(state.is_opened());
    }
}
