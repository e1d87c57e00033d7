//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::DEFAULT_MAX_PENDING_OUTPUT;

/// Configuration for one [`NetworkEngine`](crate::NetworkEngine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Size of the connection pool. Session ids range over
    /// `0..max_connections`.
    pub max_connections: usize,

    /// How long one watch round blocks waiting for readiness. This is also
    /// the granularity of `stop()` and of the idle-timeout sweep.
    pub poll_timeout: Duration,

    /// Close connections that have not sent anything for this long.
    /// `None` disables the check.
    pub connection_timeout: Option<Duration>,

    /// Backlog passed to `listen()`.
    pub listen_backlog: u32,

    /// Outbound bytes a connection may hold unsent before it is closed.
    pub max_pending_output: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_connections: 512,
            poll_timeout: Duration::from_millis(500),
            connection_timeout: None,
            listen_backlog: 512,
            max_pending_output: DEFAULT_MAX_PENDING_OUTPUT,
        }
    }
}

impl EngineConfig {
    /// A config with `max_connections` slots and a matching backlog.
    pub fn with_capacity(max_connections: usize) -> Self {
        Self {
            max_connections,
            listen_backlog: max_connections.min(u32::MAX as usize) as u32,
            ..Default::default()
        }
    }
}
