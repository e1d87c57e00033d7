//! Network layer for the HOO server.
//!
//! One [`NetworkEngine`] owns one listening socket (optional) plus a fixed
//! pool of peer connections. A background task watches them all for
//! readiness, turns whatever arrives into [`Message`] envelopes, and pushes
//! them onto a FIFO inbound queue that the session layer drains.
//!
//! ```text
//!   peers ──► Watcher ──► engine loop ──► inbound queue ──► consumer
//!                              │
//!   consumer ── send_message ──┴──► ConnectionPool ──► peers
//! ```
//!
//! The pieces are usable on their own:
//!
//! - [`ConnectionPool`]: fixed-capacity slot allocator; a slot index is
//!   the session id.
//! - [`Watcher`]: readiness multiplexer over the listener and connections.
//! - [`IpBlacklist`]: refuses peers by address at accept time.
//! - [`MessageSink`]: the one method the session layer needs from an
//!   engine, so managers can be driven by a recording double in tests.
//!
//! Errors raised to callers are setup errors ([`NetworkError`]). Once the
//! loop runs, any failure on one connection becomes exactly one
//! close-session message for that session.

mod blacklist;
mod config;
mod connection;
mod engine;
mod error;
mod pool;
mod sink;
mod watcher;

pub use blacklist::{IpBlacklist, IpStatus};
pub use config::EngineConfig;
pub use connection::Connection;
pub use engine::NetworkEngine;
pub use error::NetworkError;
pub use pool::ConnectionPool;
pub use sink::{MessageSink, RecordingSink};
pub use watcher::{WatchToken, Watcher};

pub use hoo_protocol::{Message, MessageKind, SessionId};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a std mutex, recovering the data if a holder panicked.
///
/// Every critical section in this crate leaves its data consistent before
/// doing anything that could panic, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
