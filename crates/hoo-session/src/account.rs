//! User accounts and the repository they live in.
//!
//! The session managers never store accounts themselves. Everything that
//! must survive a disconnect goes through an [`AccountRepository`]: the
//! server plugs in whatever backs it (a database, a file, a remote
//! service) and the managers only see this trait.
//!
//! [`MemoryAccountRepository`] is a complete in-process implementation,
//! used by tests and small deployments.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant, SystemTime};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

// ---------------------------------------------------------------------------
// UserAccount
// ---------------------------------------------------------------------------

/// A ban on an account. `days == 0` means forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    pub days: u32,
    pub since: SystemTime,
}

impl Ban {
    pub fn new(days: u32) -> Self {
        Self {
            days,
            since: SystemTime::now(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.days == 0
    }

    /// `true` while the ban still applies at `now`.
    pub fn is_active(&self, now: SystemTime) -> bool {
        if self.is_permanent() {
            return true;
        }
        let length = Duration::from_secs(u64::from(self.days) * SECONDS_PER_DAY);
        match self.since.checked_add(length) {
            Some(until) => now < until,
            None => true,
        }
    }
}

/// The account record a logged-in session carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub login: String,
    pub password: String,
    pub mail: String,
    pub is_logged: bool,
    pub ban: Option<Ban>,
    pub locked: bool,
}

impl UserAccount {
    pub fn new(
        login: impl Into<String>,
        password: impl Into<String>,
        mail: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            mail: mail.into(),
            ..Default::default()
        }
    }

    /// What the client gets to see after logging in.
    pub fn infos(&self) -> AccountInfos {
        AccountInfos {
            login: self.login.clone(),
            mail: self.mail.clone(),
        }
    }
}

/// Public part of an account, returned on a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfos {
    pub login: String,
    pub mail: String,
}

// ---------------------------------------------------------------------------
// Answers
// ---------------------------------------------------------------------------

/// Why a login was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginRefusal {
    /// Unknown login, or a bad activation code.
    Failed,
    PasswordFailed,
    AlreadyLogged,
    Banned,
    Locked,
}

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginAnswer {
    Ok(AccountInfos),
    Refused(LoginRefusal),
}

impl LoginAnswer {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Result of a protocol version check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectAnswer {
    Ok,
    VersionError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginAvailability {
    Available,
    Taken,
    Forbidden,
    Incorrect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateAccountAnswer {
    Created,
    LoginTaken,
    LoginForbidden,
    LoginIncorrect,
    PasswordIncorrect,
    MailIncorrect,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// 3 to 32 characters out of ASCII letters, digits, `_`, `-` and `.`.
pub fn is_valid_login(login: &str) -> bool {
    (3..=32).contains(&login.len())
        && login
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

pub fn is_valid_password(password: &str) -> bool {
    password.chars().count() >= 4
}

/// One `@` with something on both sides, no whitespace.
pub fn is_valid_mail(mail: &str) -> bool {
    if mail.chars().any(char::is_whitespace) {
        return false;
    }
    match mail.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// AccountRepository
// ---------------------------------------------------------------------------

/// Persistent account storage.
///
/// Methods return `impl Future + Send` so implementations can be async
/// without boxing, while the managers can still be driven from spawned
/// tasks.
pub trait AccountRepository: Send + Sync + 'static {
    /// Checks credentials and, on success, marks the account logged in and
    /// returns it.
    fn login(
        &self,
        login: &str,
        password: &str,
    ) -> impl Future<Output = Result<UserAccount, LoginRefusal>> + Send;

    /// Same as [`login`](Self::login) but with a one-time activation code
    /// instead of the password.
    fn login_with_activation_code(
        &self,
        login: &str,
        code: &str,
    ) -> impl Future<Output = Result<UserAccount, LoginRefusal>> + Send;

    /// Overwrites the stored record for `account.login`. Returns `false`
    /// if there is no such account.
    fn update_account(&self, account: &UserAccount) -> impl Future<Output = bool> + Send;

    /// Bans an offline account for `days` (0 = forever).
    fn ban_user(&self, login: &str, days: u32) -> impl Future<Output = bool> + Send;

    fn unban_user(&self, login: &str) -> impl Future<Output = bool> + Send;

    fn lock_account(&self, login: &str) -> impl Future<Output = bool> + Send;

    fn unlock_account(&self, login: &str) -> impl Future<Output = bool> + Send;

    /// Only answers `Available` or `Taken`; syntax checks are the
    /// manager's job.
    fn check_login_availability(
        &self,
        login: &str,
    ) -> impl Future<Output = LoginAvailability> + Send;

    /// Only answers `Created` or `LoginTaken`.
    fn create_account(
        &self,
        account: &UserAccount,
    ) -> impl Future<Output = CreateAccountAnswer> + Send;
}

// ---------------------------------------------------------------------------
// MemoryAccountRepository
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredAccount {
    account: UserAccount,
    activation: Option<(String, Instant)>,
}

/// An [`AccountRepository`] kept in a hash map.
#[derive(Debug, Default)]
pub struct MemoryAccountRepository {
    accounts: RwLock<HashMap<String, StoredAccount>>,
}

impl MemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an account.
    pub async fn insert(&self, account: UserAccount) {
        self.accounts.write().await.insert(
            account.login.clone(),
            StoredAccount {
                account,
                activation: None,
            },
        );
    }

    /// A copy of the stored record.
    pub async fn get(&self, login: &str) -> Option<UserAccount> {
        self.accounts
            .read()
            .await
            .get(login)
            .map(|stored| stored.account.clone())
    }

    /// Generates a one-time activation code for `login`, valid for
    /// `valid_for`. Returns `None` for an unknown login.
    pub async fn issue_activation_code(&self, login: &str, valid_for: Duration) -> Option<String> {
        let mut accounts = self.accounts.write().await;
        let stored = accounts.get_mut(login)?;
        let code = generate_code();
        stored.activation = Some((code.clone(), Instant::now() + valid_for));
        Some(code)
    }

    fn check_and_log_in(stored: &mut StoredAccount, password: &str) -> Result<UserAccount, LoginRefusal> {
        let account = &mut stored.account;
        if account.locked {
            return Err(LoginRefusal::Locked);
        }
        match account.ban {
            Some(ban) if ban.is_active(SystemTime::now()) => return Err(LoginRefusal::Banned),
            Some(_) => account.ban = None,
            None => {}
        }
        if account.password != password {
            return Err(LoginRefusal::PasswordFailed);
        }
        if account.is_logged {
            return Err(LoginRefusal::AlreadyLogged);
        }
        account.is_logged = true;
        Ok(account.clone())
    }
}

impl AccountRepository for MemoryAccountRepository {
    async fn login(&self, login: &str, password: &str) -> Result<UserAccount, LoginRefusal> {
        let mut accounts = self.accounts.write().await;
        let stored = accounts.get_mut(login).ok_or(LoginRefusal::Failed)?;
        Self::check_and_log_in(stored, password)
    }

    async fn login_with_activation_code(
        &self,
        login: &str,
        code: &str,
    ) -> Result<UserAccount, LoginRefusal> {
        let mut accounts = self.accounts.write().await;
        let stored = accounts.get_mut(login).ok_or(LoginRefusal::Failed)?;
        let valid = stored
            .activation
            .as_ref()
            .is_some_and(|(expected, until)| Instant::now() < *until && expected == code.trim());
        if !valid {
            return Err(LoginRefusal::Failed);
        }
        stored.activation = None;
        let password = stored.account.password.clone();
        Self::check_and_log_in(stored, &password)
    }

    async fn update_account(&self, account: &UserAccount) -> bool {
        match self.accounts.write().await.get_mut(&account.login) {
            Some(stored) => {
                stored.account = account.clone();
                true
            }
            None => false,
        }
    }

    async fn ban_user(&self, login: &str, days: u32) -> bool {
        match self.accounts.write().await.get_mut(login) {
            Some(stored) => {
                stored.account.ban = Some(Ban::new(days));
                true
            }
            None => false,
        }
    }

    async fn unban_user(&self, login: &str) -> bool {
        match self.accounts.write().await.get_mut(login) {
            Some(stored) => {
                stored.account.ban = None;
                true
            }
            None => false,
        }
    }

    async fn lock_account(&self, login: &str) -> bool {
        self.set_locked(login, true).await
    }

    async fn unlock_account(&self, login: &str) -> bool {
        self.set_locked(login, false).await
    }

    async fn check_login_availability(&self, login: &str) -> LoginAvailability {
        if self.accounts.read().await.contains_key(login) {
            LoginAvailability::Taken
        } else {
            LoginAvailability::Available
        }
    }

    async fn create_account(&self, account: &UserAccount) -> CreateAccountAnswer {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.login) {
            return CreateAccountAnswer::LoginTaken;
        }
        accounts.insert(
            account.login.clone(),
            StoredAccount {
                account: account.clone(),
                activation: None,
            },
        );
        CreateAccountAnswer::Created
    }
}

impl MemoryAccountRepository {
    async fn set_locked(&self, login: &str, locked: bool) -> bool {
        match self.accounts.write().await.get_mut(login) {
            Some(stored) => {
                stored.account.locked = locked;
                true
            }
            None => false,
        }
    }
}

/// Eight random characters out of an alphabet without look-alikes.
fn generate_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::rng();
    (0..8)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}
