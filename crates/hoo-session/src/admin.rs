//! The admin-facing session manager.
//!
//! Admin sessions have their own slots, opened list and cap, and log in
//! against the configured credentials instead of the account repository.
//! Most operations act on *user* sessions: they look a user up in the
//! opened user list, act on the live session when it is there, and fall
//! back to the repository when it is not.

use std::sync::Arc;

use hoo_protocol::{MaintenanceKind, Message, SessionId, UserNotice};
use serde::{Deserialize, Serialize};

use crate::{
    notice_message, AccountRepository, Ban, ConnectAnswer, LoginAnswer, LoginRefusal,
    QuickMatchStatus, ServerData, Session, SessionError, UserAccount, UserSessionManager,
};

/// One row of [`AdminSessionManager::get_users_infos`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub session_id: SessionId,
    pub logged_in: bool,
    /// Empty when not logged in.
    pub login: String,
    pub quick_match: QuickMatchStatus,
}

/// What a forced disconnect does to the live account before closing.
#[derive(Debug, Clone, Copy)]
enum Sanction {
    Ban(u32),
    Lock,
}

pub struct AdminSessionManager<R> {
    data: Arc<ServerData<R>>,
    users: Arc<UserSessionManager<R>>,
}

impl<R: AccountRepository> AdminSessionManager<R> {
    pub fn new(data: Arc<ServerData<R>>, users: Arc<UserSessionManager<R>>) -> Self {
        Self { data, users }
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    pub fn is_id_session_valid(&self, id: SessionId) -> bool {
        id.is_valid_for(self.data.config().max_sessions)
    }

    pub fn get_session(&self, id: SessionId) -> Result<&Arc<Session>, SessionError> {
        id.index()
            .and_then(|i| self.data.admin_sessions.get(i))
            .ok_or(SessionError::InvalidSessionId(id))
    }

    pub async fn open_session(&self, id: SessionId) -> Result<(), SessionError> {
        let session = self.get_session(id).map_err(|_| {
            SessionError::wrong_protocol(format!(
                "Trying to open an admin session with an incorrect session id: {id}."
            ))
        })?;

        {
            let mut opened = self.data.opened_admin_sessions.lock().await;
            if opened.iter().any(|s| s.id() == id) {
                return Ok(());
            }
            if opened.len() >= self.data.config().max_admin_sessions {
                tracing::warn!(session = %id, "maximum admin sessions reached");
                return Err(SessionError::maximum_connection_reached());
            }
            opened.push(Arc::clone(session));
        }

        session.lock().await.open();
        tracing::info!(session = %id, "admin session opened");
        Ok(())
    }

    pub async fn close_session(&self, id: SessionId) -> Result<(), SessionError> {
        let session = self.get_session(id).map_err(|_| {
            SessionError::wrong_protocol(format!(
                "Trying to close an admin session with an incorrect session id: {id}."
            ))
        })?;

        let removed = {
            let mut opened = self.data.opened_admin_sessions.lock().await;
            let before = opened.len();
            opened.retain(|s| s.id() != id);
            opened.len() != before
        };
        if removed {
            session.lock().await.close();
            tracing::info!(session = %id, "admin session closed");
        }
        Ok(())
    }

    pub fn connect(&self, version: i32) -> ConnectAnswer {
        if version == self.data.config().protocol_version {
            ConnectAnswer::Ok
        } else {
            ConnectAnswer::VersionError
        }
    }

    /// Logs an administrator in against the configured credentials.
    pub async fn login(
        &self,
        id: SessionId,
        login: &str,
        password: &str,
    ) -> Result<LoginAnswer, SessionError> {
        let session = self.get_session(id)?;
        if !self.data.config().is_admin(login, password) {
            tracing::warn!(session = %id, login, "admin login refused");
            return Ok(LoginAnswer::Refused(LoginRefusal::Failed));
        }

        let account = UserAccount {
            login: login.to_string(),
            is_logged: true,
            ..Default::default()
        };
        let infos = account.infos();
        session.lock().await.login(account);
        tracing::info!(session = %id, login, "admin logged in");
        Ok(LoginAnswer::Ok(infos))
    }

    pub async fn logout(&self, id: SessionId) -> Result<(), SessionError> {
        self.get_session(id)?.lock().await.logout();
        Ok(())
    }

    pub async fn get_time_before_shutdown(&self) -> i32 {
        self.data.time_before_shutdown().await
    }

    /// Sends `message` through the admin-facing engine.
    pub fn send_answer(&self, message: Message) {
        self.data.admin_engine().send_message(message);
    }

    // -----------------------------------------------------------------------
    // Monitoring
    // -----------------------------------------------------------------------

    pub async fn count_connected_users(&self) -> usize {
        self.data.opened_user_sessions.lock().await.len()
    }

    pub async fn get_users_infos(&self) -> Vec<UserInfo> {
        let sessions = self.opened_users().await;
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            let state = session.lock().await;
            infos.push(UserInfo {
                session_id: session.id(),
                logged_in: state.is_logged_in(),
                login: state.login_name().unwrap_or_default().to_string(),
                quick_match: state.quick_match_status(),
            });
        }
        infos
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Schedules a shutdown `seconds` from now and warns every logged-in
    /// user.
    pub async fn shutdown(&self, seconds: u32) {
        self.data.schedule_shutdown(seconds).await;
        tracing::info!(
            minutes = seconds / 60,
            seconds,
            "shutdown scheduled"
        );

        let notice = UserNotice::Maintenance {
            kind: MaintenanceKind::ServerShutdown,
            seconds: i32::try_from(seconds).unwrap_or(i32::MAX),
        };
        for session in self.opened_users().await {
            if session.lock().await.is_logged_in() {
                self.send_to_user(session.id(), &notice);
            }
        }
    }

    /// Bans each login for `days` (0 = forever).
    ///
    /// A connected user is disconnected and the ban is saved with the
    /// session; an offline user is banned through the repository. The
    /// result for each login is `true` on success.
    pub async fn ban_users(&self, logins: &[String], days: u32) -> Vec<bool> {
        let mut banned = Vec::with_capacity(logins.len());
        for login in logins {
            let done = self.disconnect_user(login, Sanction::Ban(days)).await
                || self.data.accounts().ban_user(login, days).await;
            tracing::info!(%login, days, banned = done, "ban user");
            banned.push(done);
        }
        banned
    }

    pub async fn unban_users(&self, logins: &[String]) -> Vec<bool> {
        let mut unbanned = Vec::with_capacity(logins.len());
        for login in logins {
            unbanned.push(self.data.accounts().unban_user(login).await);
        }
        unbanned
    }

    /// Locks each account. A connected user gets a maintenance notice and
    /// is disconnected.
    pub async fn lock_users(&self, logins: &[String]) -> Vec<bool> {
        let mut locked = Vec::with_capacity(logins.len());
        for login in logins {
            let done = self.disconnect_user(login, Sanction::Lock).await
                || self.data.accounts().lock_account(login).await;
            tracing::info!(%login, locked = done, "lock user");
            locked.push(done);
        }
        locked
    }

    pub async fn unlock_users(&self, logins: &[String]) -> Vec<bool> {
        let mut unlocked = Vec::with_capacity(logins.len());
        for login in logins {
            unlocked.push(self.data.accounts().unlock_account(login).await);
        }
        unlocked
    }

    /// Sends an admin message to every logged-in user, or only to the
    /// listed logins. Each listed login receives it at most once.
    pub async fn send_message_to_users(&self, text: &str, for_all_users: bool, logins: &[String]) {
        if for_all_users {
            tracing::info!(text, "broadcast admin message");
        } else {
            tracing::info!(text, ?logins, "send admin message");
        }

        let notice = UserNotice::AdminMessage {
            text: text.to_string(),
        };
        let mut to_find: Vec<&String> = logins.iter().collect();

        for session in self.opened_users().await {
            let send = {
                let state = session.lock().await;
                match state.login_name() {
                    None => false,
                    Some(_) if for_all_users => true,
                    Some(login) => match to_find.iter().position(|l| l.as_str() == login) {
                        Some(pos) => {
                            to_find.swap_remove(pos);
                            true
                        }
                        None => false,
                    },
                }
            };
            if send {
                self.send_to_user(session.id(), &notice);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Snapshot of the opened user list. The list lock is released before
    /// this returns.
    async fn opened_users(&self) -> Vec<Arc<Session>> {
        self.data.opened_user_sessions.lock().await.clone()
    }

    async fn find_logged_user(&self, login: &str) -> Option<Arc<Session>> {
        for session in self.opened_users().await {
            if session.lock().await.login_name() == Some(login) {
                return Some(session);
            }
        }
        None
    }

    /// Applies `sanction` to the live session of `login` and disconnects
    /// it. Returns `false` if `login` is not connected.
    ///
    /// The session is re-checked under its own lock: a user who logged out
    /// since the lookup is treated as offline.
    ///
    /// The session state is closed here; the engine's close-session that
    /// follows the disconnect finds nothing left to do.
    async fn disconnect_user(&self, login: &str, sanction: Sanction) -> bool {
        let Some(session) = self.find_logged_user(login).await else {
            return false;
        };

        {
            let mut state = session.lock().await;
            let Some(account) = state.account_mut().filter(|a| a.login == login) else {
                return false;
            };
            match sanction {
                Sanction::Ban(days) => account.ban = Some(Ban::new(days)),
                Sanction::Lock => account.locked = true,
            }
        }

        let id = session.id();
        if let Err(e) = self.users.close_session(id).await {
            tracing::warn!(session = %id, error = %e, "failed to close sanctioned session");
        }
        if let Sanction::Lock = sanction {
            self.send_to_user(
                id,
                &UserNotice::Maintenance {
                    kind: MaintenanceKind::UserAccount,
                    seconds: 0,
                },
            );
        }
        self.data.user_engine().send_message(Message::close_session(id));
        tracing::info!(session = %id, %login, ?sanction, "user disconnected");
        true
    }

    fn send_to_user(&self, id: SessionId, notice: &UserNotice) {
        if let Some(message) = notice_message(id, notice) {
            self.data.user_engine().send_message(message);
        }
    }
}
