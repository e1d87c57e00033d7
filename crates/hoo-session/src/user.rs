//! The user-facing session manager.
//!
//! Every method that names a session validates the id first. Anything
//! that touches session fields runs under that session's lock; anything
//! that touches a shared list runs under the list's lock; the two are
//! never held together.

use std::sync::Arc;

use hoo_protocol::{Message, SessionId};

use crate::{
    is_valid_login, is_valid_mail, is_valid_password, AccountRepository, ConnectAnswer,
    CreateAccountAnswer, GameLink, LoginAnswer, LoginAvailability, LoginRefusal,
    QuickMatchStatus, ServerData, Session, SessionError, UserAccount,
};

pub struct UserSessionManager<R> {
    data: Arc<ServerData<R>>,
}

impl<R: AccountRepository> UserSessionManager<R> {
    pub fn new(data: Arc<ServerData<R>>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Arc<ServerData<R>> {
        &self.data
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// `true` iff `0 <= id < max_sessions`.
    pub fn is_id_session_valid(&self, id: SessionId) -> bool {
        id.is_valid_for(self.data.config().max_sessions)
    }

    /// The session slot for `id`.
    ///
    /// # Errors
    /// [`SessionError::InvalidSessionId`] for an out-of-range id.
    pub fn get_session(&self, id: SessionId) -> Result<&Arc<Session>, SessionError> {
        id.index()
            .and_then(|i| self.data.user_sessions.get(i))
            .ok_or(SessionError::InvalidSessionId(id))
    }

    /// Opens the session for a newly connected peer.
    ///
    /// # Errors
    /// - `Disconnect { WrongProtocol }` for an invalid id.
    /// - `Disconnect { MaximumConnectionReached }` when `max_user_sessions`
    ///   sessions are already open.
    pub async fn open_session(&self, id: SessionId) -> Result<(), SessionError> {
        let session = self.get_session(id).map_err(|_| {
            SessionError::wrong_protocol(format!(
                "Trying to open a user session with an incorrect session id: {id}."
            ))
        })?;

        {
            let mut opened = self.data.opened_user_sessions.lock().await;
            if opened.iter().any(|s| s.id() == id) {
                tracing::debug!(session = %id, "user session already open");
                return Ok(());
            }
            if opened.len() >= self.data.config().max_user_sessions {
                tracing::warn!(session = %id, "maximum user sessions reached");
                return Err(SessionError::maximum_connection_reached());
            }
            opened.push(Arc::clone(session));
        }

        session.lock().await.open();
        tracing::info!(session = %id, "user session opened");
        Ok(())
    }

    /// Closes a user session. Closing an already closed session does
    /// nothing.
    ///
    /// Leaves any game and the match-making queue, persists the account as
    /// logged out, and drops the session from the opened list. The
    /// connection itself belongs to the engine and is not touched here.
    ///
    /// # Errors
    /// `Disconnect { WrongProtocol }` for an invalid id.
    pub async fn close_session(&self, id: SessionId) -> Result<(), SessionError> {
        let session = Arc::clone(self.get_session(id).map_err(|_| {
            SessionError::wrong_protocol(format!(
                "Trying to close a user session with an incorrect session id: {id}."
            ))
        })?);

        let (status, game) = {
            let mut state = session.lock().await;
            let status = state.quick_match_status();
            state.set_quick_match_status(QuickMatchStatus::NotWaiting);
            (status, state.take_game())
        };

        if let Some(game) = game {
            game.on_player_disconnection(id);
        }
        if status == QuickMatchStatus::LookingForOpponent {
            self.remove_from_looking_for_opponent(id).await;
        }

        self.persist_logout(&session).await;

        let removed = {
            let mut opened = self.data.opened_user_sessions.lock().await;
            match opened.iter().position(|s| s.id() == id) {
                Some(pos) => {
                    opened.remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            session.lock().await.close();
            tracing::info!(session = %id, "user session closed");
        }
        Ok(())
    }

    /// Checks the client's protocol version.
    pub fn connect(&self, version: i32) -> ConnectAnswer {
        if version == self.data.config().protocol_version {
            ConnectAnswer::Ok
        } else {
            tracing::debug!(version, "client protocol version mismatch");
            ConnectAnswer::VersionError
        }
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    pub async fn login(
        &self,
        id: SessionId,
        login: &str,
        password: &str,
    ) -> Result<LoginAnswer, SessionError> {
        let session = self.get_session(id)?;
        if session.lock().await.is_logged_in() {
            return Ok(LoginAnswer::Refused(LoginRefusal::AlreadyLogged));
        }
        let result = self.data.accounts().login(login, password).await;
        Ok(self.finish_login(session, id, result).await)
    }

    pub async fn login_with_activation_code(
        &self,
        id: SessionId,
        login: &str,
        code: &str,
    ) -> Result<LoginAnswer, SessionError> {
        let session = self.get_session(id)?;
        if session.lock().await.is_logged_in() {
            return Ok(LoginAnswer::Refused(LoginRefusal::AlreadyLogged));
        }
        let result = self
            .data
            .accounts()
            .login_with_activation_code(login, code)
            .await;
        Ok(self.finish_login(session, id, result).await)
    }

    async fn finish_login(
        &self,
        session: &Session,
        id: SessionId,
        result: Result<UserAccount, LoginRefusal>,
    ) -> LoginAnswer {
        match result {
            Ok(account) => {
                let infos = account.infos();
                tracing::info!(session = %id, login = %account.login, "user logged in");
                session.lock().await.login(account);
                LoginAnswer::Ok(infos)
            }
            Err(refusal) => {
                tracing::debug!(session = %id, ?refusal, "login refused");
                LoginAnswer::Refused(refusal)
            }
        }
    }

    /// Logs the session out and persists the account.
    pub async fn logout(&self, id: SessionId) -> Result<(), SessionError> {
        let session = self.get_session(id)?;
        let was_waiting = self.persist_logout(session).await;
        if was_waiting {
            self.remove_from_looking_for_opponent(id).await;
        }
        Ok(())
    }

    /// Marks the account logged out, saves it, and resets the session.
    /// Returns whether the session was waiting for a match.
    async fn persist_logout(&self, session: &Session) -> bool {
        let mut state = session.lock().await;
        let was_waiting = state.quick_match_status() == QuickMatchStatus::LookingForOpponent;
        if let Some(account) = state.account_mut() {
            account.is_logged = false;
            let account = account.clone();
            if !self.data.accounts().update_account(&account).await {
                tracing::warn!(login = %account.login, "failed to persist account on logout");
            }
            state.logout();
            tracing::info!(session = %session.id(), login = %account.login, "user logged out");
        }
        was_waiting
    }

    pub async fn check_login_availability(&self, login: &str) -> LoginAvailability {
        if self.data.config().is_forbidden_login(login) {
            LoginAvailability::Forbidden
        } else if !is_valid_login(login) {
            LoginAvailability::Incorrect
        } else {
            self.data.accounts().check_login_availability(login).await
        }
    }

    /// Creates an account and logs the session into it.
    pub async fn create_user_account(
        &self,
        id: SessionId,
        mut account: UserAccount,
    ) -> Result<CreateAccountAnswer, SessionError> {
        let session = self.get_session(id)?;

        let answer = if self.data.config().is_forbidden_login(&account.login) {
            CreateAccountAnswer::LoginForbidden
        } else if !is_valid_login(&account.login) {
            CreateAccountAnswer::LoginIncorrect
        } else if !is_valid_password(&account.password) {
            CreateAccountAnswer::PasswordIncorrect
        } else if !is_valid_mail(&account.mail) {
            CreateAccountAnswer::MailIncorrect
        } else {
            account.is_logged = true;
            account.ban = None;
            account.locked = false;
            self.data.accounts().create_account(&account).await
        };

        if answer == CreateAccountAnswer::Created {
            tracing::info!(session = %id, login = %account.login, "user account created");
            session.lock().await.login(account);
        }
        Ok(answer)
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    /// Seconds before the scheduled shutdown, or -1.
    pub async fn get_time_before_shutdown(&self) -> i32 {
        self.data.time_before_shutdown().await
    }

    /// Sends `message` through the user-facing engine.
    pub fn send_answer(&self, message: Message) {
        self.data.user_engine().send_message(message);
    }

    // -----------------------------------------------------------------------
    // Match-making
    // -----------------------------------------------------------------------

    /// Puts the session in the waiting list.
    ///
    /// Returns `false` if it is already waiting.
    pub async fn quick_match(&self, id: SessionId) -> Result<bool, SessionError> {
        let session = self.get_session(id)?;
        {
            let mut state = session.lock().await;
            if state.quick_match_status() != QuickMatchStatus::NotWaiting {
                return Ok(false);
            }
            state.set_quick_match_status(QuickMatchStatus::LookingForOpponent);
        }

        let mut waiting = self.data.looking_for_opponent.lock().await;
        if !waiting.iter().any(|s| s.id() == id) {
            waiting.push_back(Arc::clone(session));
        }
        tracing::debug!(session = %id, "looking for an opponent");
        Ok(true)
    }

    pub async fn cancel_quick_match(&self, id: SessionId) -> Result<(), SessionError> {
        let session = self.get_session(id)?;
        session
            .lock()
            .await
            .set_quick_match_status(QuickMatchStatus::NotWaiting);
        self.remove_from_looking_for_opponent(id).await;
        Ok(())
    }

    /// Drops `id` from the waiting list, if it is there.
    pub async fn remove_from_looking_for_opponent(&self, id: SessionId) {
        self.data
            .looking_for_opponent
            .lock()
            .await
            .retain(|s| s.id() != id);
    }

    /// Ids currently waiting, oldest first.
    pub async fn looking_for_opponent(&self) -> Vec<SessionId> {
        self.data
            .looking_for_opponent
            .lock()
            .await
            .iter()
            .map(|s| s.id())
            .collect()
    }

    /// Attaches the game the session now plays in.
    pub async fn assign_game(
        &self,
        id: SessionId,
        game: Arc<dyn GameLink>,
    ) -> Result<(), SessionError> {
        let session = self.get_session(id)?;
        session.lock().await.set_game(Some(game));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DisconnectReason, MemoryAccountRepository, SessionConfig};
    use hoo_net::RecordingSink;
    use std::sync::Mutex;

    fn manager(max_user_sessions: usize) -> UserSessionManager<MemoryAccountRepository> {
        let config = SessionConfig {
            max_sessions: 8,
            max_user_sessions,
            protocol_version: 3,
            forbidden_logins: vec!["root".into()],
            ..Default::default()
        };
        let data = ServerData::new(
            config,
            MemoryAccountRepository::new(),
            Arc::new(RecordingSink::new()),
            Arc::new(RecordingSink::new()),
        );
        UserSessionManager::new(Arc::new(data))
    }

    async fn logged_in(
        users: &UserSessionManager<MemoryAccountRepository>,
        id: SessionId,
        login: &str,
    ) {
        users
            .data()
            .accounts()
            .insert(UserAccount::new(login, "pass", format!("{login}@example.com")))
            .await;
        users.open_session(id).await.unwrap();
        assert!(users.login(id, login, "pass").await.unwrap().is_ok());
    }

    #[derive(Default)]
    struct RecordingGame {
        left: Mutex<Vec<SessionId>>,
    }

    impl GameLink for RecordingGame {
        fn on_player_disconnection(&self, session_id: SessionId) {
            self.left.lock().unwrap().push(session_id);
        }
    }

    // =====================================================================
    // is_id_session_valid / get_session
    // =====================================================================

    #[test]
    fn test_is_id_session_valid_bounds() {
        let users = manager(4);
        assert!(users.is_id_session_valid(SessionId(0)));
        assert!(users.is_id_session_valid(SessionId(7)));
        assert!(!users.is_id_session_valid(SessionId(8)));
        assert!(!users.is_id_session_valid(SessionId(-1)));
    }

    #[test]
    fn test_get_session_invalid_id_fails() {
        let users = manager(4);
        assert!(matches!(
            users.get_session(SessionId(8)),
            Err(SessionError::InvalidSessionId(SessionId(8)))
        ));
        assert_eq!(users.get_session(SessionId(5)).unwrap().id(), SessionId(5));
    }

    // =====================================================================
    // open_session / close_session
    // =====================================================================

    #[tokio::test]
    async fn test_open_session_invalid_id_is_wrong_protocol() {
        let users = manager(4);
        let err = users.open_session(SessionId(99)).await.unwrap_err();
        assert_eq!(err.disconnect_reason(), DisconnectReason::WrongProtocol);
    }

    #[tokio::test]
    async fn test_open_session_over_cap_fails_until_one_closes() {
        let users = manager(2);
        users.open_session(SessionId(0)).await.unwrap();
        users.open_session(SessionId(1)).await.unwrap();

        let err = users.open_session(SessionId(2)).await.unwrap_err();
        assert_eq!(err.disconnect_reason(), DisconnectReason::MaximumConnectionReached);

        users.close_session(SessionId(0)).await.unwrap();
        users.open_session(SessionId(2)).await.unwrap();
        assert_eq!(users.data().opened_user_sessions.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_close_session_twice_is_noop() {
        let users = manager(4);
        logged_in(&users, SessionId(1), "alice").await;

        users.close_session(SessionId(1)).await.unwrap();
        users.close_session(SessionId(1)).await.unwrap();

        assert!(users.data().opened_user_sessions.lock().await.is_empty());
        let stored = users.data().accounts().get("alice").await.unwrap();
        assert!(!stored.is_logged);
    }

    #[tokio::test]
    async fn test_close_session_invalid_id_is_wrong_protocol() {
        let users = manager(4);
        let err = users.close_session(SessionId(-1)).await.unwrap_err();
        assert_eq!(err.disconnect_reason(), DisconnectReason::WrongProtocol);
    }

    #[tokio::test]
    async fn test_close_session_notifies_game_and_leaves_queue() {
        let users = manager(4);
        users.open_session(SessionId(2)).await.unwrap();
        let game = Arc::new(RecordingGame::default());
        users.assign_game(SessionId(2), game.clone()).await.unwrap();
        assert!(users.quick_match(SessionId(2)).await.unwrap());

        users.close_session(SessionId(2)).await.unwrap();

        assert_eq!(*game.left.lock().unwrap(), vec![SessionId(2)]);
        assert!(users.looking_for_opponent().await.is_empty());
    }

    // =====================================================================
    // connect / login / logout
    // =====================================================================

    #[test]
    fn test_connect_checks_protocol_version() {
        let users = manager(4);
        assert_eq!(users.connect(3), ConnectAnswer::Ok);
        assert_eq!(users.connect(2), ConnectAnswer::VersionError);
    }

    #[tokio::test]
    async fn test_login_ok_returns_infos() {
        let users = manager(4);
        users
            .data()
            .accounts()
            .insert(UserAccount::new("alice", "pass", "alice@example.com"))
            .await;
        users.open_session(SessionId(0)).await.unwrap();

        let answer = users.login(SessionId(0), "alice", "pass").await.unwrap();
        match answer {
            LoginAnswer::Ok(infos) => assert_eq!(infos.mail, "alice@example.com"),
            other => panic!("unexpected answer: {other:?}"),
        }
        let session = users.get_session(SessionId(0)).unwrap();
        assert_eq!(session.lock().await.login_name(), Some("alice"));
    }

    #[tokio::test]
    async fn test_login_wrong_password_is_refused() {
        let users = manager(4);
        users
            .data()
            .accounts()
            .insert(UserAccount::new("alice", "pass", "alice@example.com"))
            .await;
        let answer = users.login(SessionId(0), "alice", "nope").await.unwrap();
        assert_eq!(answer, LoginAnswer::Refused(LoginRefusal::PasswordFailed));
    }

    #[tokio::test]
    async fn test_login_twice_on_same_session_is_already_logged() {
        let users = manager(4);
        logged_in(&users, SessionId(0), "alice").await;
        users
            .data()
            .accounts()
            .insert(UserAccount::new("bob", "pass", "bob@example.com"))
            .await;
        let answer = users.login(SessionId(0), "bob", "pass").await.unwrap();
        assert_eq!(answer, LoginAnswer::Refused(LoginRefusal::AlreadyLogged));
    }

    #[tokio::test]
    async fn test_logout_persists_and_allows_new_login() {
        let users = manager(4);
        logged_in(&users, SessionId(0), "alice").await;

        users.logout(SessionId(0)).await.unwrap();
        assert!(!users.data().accounts().get("alice").await.unwrap().is_logged);
        assert!(!users.get_session(SessionId(0)).unwrap().lock().await.is_logged_in());

        assert!(users.login(SessionId(0), "alice", "pass").await.unwrap().is_ok());
    }

    // =====================================================================
    // account creation
    // =====================================================================

    #[tokio::test]
    async fn test_check_login_availability_order() {
        let users = manager(4);
        assert_eq!(users.check_login_availability("ROOT").await, LoginAvailability::Forbidden);
        assert_eq!(users.check_login_availability("a").await, LoginAvailability::Incorrect);
        assert_eq!(users.check_login_availability("carol").await, LoginAvailability::Available);
    }

    #[tokio::test]
    async fn test_create_user_account_validates_fields() {
        let users = manager(4);
        let id = SessionId(0);
        let create = |login: &str, password: &str, mail: &str| UserAccount::new(login, password, mail);

        assert_eq!(
            users.create_user_account(id, create("root", "pass", "a@b")).await.unwrap(),
            CreateAccountAnswer::LoginForbidden
        );
        assert_eq!(
            users.create_user_account(id, create("x", "pass", "a@b")).await.unwrap(),
            CreateAccountAnswer::LoginIncorrect
        );
        assert_eq!(
            users.create_user_account(id, create("carol", "p", "a@b")).await.unwrap(),
            CreateAccountAnswer::PasswordIncorrect
        );
        assert_eq!(
            users.create_user_account(id, create("carol", "pass", "nomail")).await.unwrap(),
            CreateAccountAnswer::MailIncorrect
        );
    }

    #[tokio::test]
    async fn test_create_user_account_logs_session_in() {
        let users = manager(4);
        users.open_session(SessionId(1)).await.unwrap();
        let answer = users
            .create_user_account(SessionId(1), UserAccount::new("carol", "pass", "c@d"))
            .await
            .unwrap();
        assert_eq!(answer, CreateAccountAnswer::Created);
        assert!(users.get_session(SessionId(1)).unwrap().lock().await.is_logged_in());

        let again = users
            .create_user_account(SessionId(2), UserAccount::new("carol", "pass", "c@d"))
            .await
            .unwrap();
        assert_eq!(again, CreateAccountAnswer::LoginTaken);
    }

    // =====================================================================
    // match-making
    // =====================================================================

    #[tokio::test]
    async fn test_quick_match_twice_returns_true_then_false() {
        let users = manager(4);
        users.open_session(SessionId(0)).await.unwrap();

        assert!(users.quick_match(SessionId(0)).await.unwrap());
        assert!(!users.quick_match(SessionId(0)).await.unwrap());
        assert_eq!(users.looking_for_opponent().await, vec![SessionId(0)]);
    }

    #[tokio::test]
    async fn test_cancel_quick_match_allows_requeue() {
        let users = manager(4);
        users.open_session(SessionId(0)).await.unwrap();
        users.quick_match(SessionId(0)).await.unwrap();

        users.cancel_quick_match(SessionId(0)).await.unwrap();
        assert!(users.looking_for_opponent().await.is_empty());

        assert!(users.quick_match(SessionId(0)).await.unwrap());
        assert_eq!(users.looking_for_opponent().await, vec![SessionId(0)]);
    }

    #[tokio::test]
    async fn test_logout_while_waiting_leaves_queue() {
        let users = manager(4);
        logged_in(&users, SessionId(0), "alice").await;
        users.quick_match(SessionId(0)).await.unwrap();

        users.logout(SessionId(0)).await.unwrap();
        assert!(users.looking_for_opponent().await.is_empty());
    }

    #[tokio::test]
    async fn test_quick_match_invalid_id_fails() {
        let users = manager(4);
        assert!(users.quick_match(SessionId(100)).await.is_err());
    }

    // =====================================================================
    // messaging
    // =====================================================================

    #[tokio::test]
    async fn test_get_time_before_shutdown_unscheduled_is_minus_one() {
        let users = manager(4);
        assert_eq!(users.get_time_before_shutdown().await, -1);
    }
}
