//! Server configuration.
//!
//! One [`ServerConfig`] describes both ports. The user and admin engines
//! share the engine settings, and both session managers share the session
//! settings, since a session id is a slot index in either pool.

use std::time::Duration;

use hoo_net::EngineConfig;
use hoo_session::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Listen address that resolves to the host's primary IPv4 address.
pub const AUTO_ADDRESS: &str = "auto";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address for user connections. Empty means every interface,
    /// [`AUTO_ADDRESS`] means the host's primary address.
    pub user_address: String,
    pub user_port: u16,

    /// Address for admin connections, same rules as `user_address`.
    pub admin_address: String,
    pub admin_port: u16,

    /// Idle timeout applied to both engines, in seconds. 0 disables it.
    pub connection_timeout_secs: u64,

    /// How often waiting players are paired.
    pub matcher_interval: Duration,

    pub engine: EngineConfig,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            user_address: String::new(),
            user_port: 9_000,
            admin_address: String::new(),
            admin_port: 9_001,
            connection_timeout_secs: 0,
            matcher_interval: Duration::from_secs(1),
            engine: EngineConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Returns a copy with inconsistent values clamped.
    ///
    /// The session slot count always follows the engine pool size, the
    /// per-manager caps are kept within `1..=max_sessions`, and the idle
    /// timeout is copied into the engine config.
    pub fn validated(mut self) -> Self {
        if self.engine.max_connections == 0 {
            warn!("max_connections is 0, using 1");
            self.engine.max_connections = 1;
        }
        if self.session.max_sessions != self.engine.max_connections {
            warn!(
                max_sessions = self.session.max_sessions,
                max_connections = self.engine.max_connections,
                "max_sessions differs from the engine pool size, aligning"
            );
            self.session.max_sessions = self.engine.max_connections;
        }

        let max = self.session.max_sessions;
        self.session.max_user_sessions =
            clamp_cap("max_user_sessions", self.session.max_user_sessions, max);
        self.session.max_admin_sessions =
            clamp_cap("max_admin_sessions", self.session.max_admin_sessions, max);

        if self.matcher_interval.is_zero() {
            warn!("matcher_interval is 0, using 1s");
            self.matcher_interval = Duration::from_secs(1);
        }

        self.engine.connection_timeout = match self.connection_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        self
    }
}

fn clamp_cap(name: &'static str, value: usize, max: usize) -> usize {
    let clamped = value.clamp(1, max);
    if clamped != value {
        warn!(cap = name, value, clamped, "session cap out of range, clamping");
    }
    clamped
}
