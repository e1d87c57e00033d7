//! Session-layer configuration.

use serde::{Deserialize, Serialize};

/// A login/password pair allowed on the admin port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCredentials {
    pub login: String,
    pub password: String,
}

/// Limits and identity settings shared by both session managers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of session slots per manager. Must match the engine's pool
    /// size, since a session id is a pool slot index.
    pub max_sessions: usize,

    /// How many user sessions may be open at once.
    pub max_user_sessions: usize,

    /// How many admin sessions may be open at once.
    pub max_admin_sessions: usize,

    /// The client protocol version `connect` accepts.
    pub protocol_version: i32,

    /// Logins nobody may register.
    pub forbidden_logins: Vec<String>,

    /// Who may log in on the admin port.
    pub admin_credentials: Vec<AdminCredentials>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 512,
            max_user_sessions: 500,
            max_admin_sessions: 12,
            protocol_version: 1,
            forbidden_logins: Vec::new(),
            admin_credentials: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// `true` if `login` is on the forbidden list (case-insensitive).
    pub fn is_forbidden_login(&self, login: &str) -> bool {
        self.forbidden_logins
            .iter()
            .any(|f| f.eq_ignore_ascii_case(login))
    }

    pub fn is_admin(&self, login: &str, password: &str) -> bool {
        self.admin_credentials
            .iter()
            .any(|c| c.login == login && c.password == password)
    }
}
