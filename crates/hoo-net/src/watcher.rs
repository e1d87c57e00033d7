//! Readiness multiplexer.
//!
//! The watcher keeps a registry of sockets keyed by [`WatchToken`]. One
//! round goes:
//!
//! 1. [`init`](Watcher::init) snapshots the registry into the round's mask
//!    and reports how many sources are in it (0 means nothing to do);
//! 2. [`watch`](Watcher::watch) waits up to the poll timeout for any of
//!    them to become ready and records which ones did;
//! 3. the caller asks [`has_seen`](Watcher::has_seen) per token and
//!    services only those.
//!
//! Tokio exposes readiness for streams but not for listeners, so for the
//! server token the watcher completes the `accept` itself and parks the
//! new stream until [`take_accepted`](Watcher::take_accepted) collects it.
//!
//! Registrations made during a round take effect at the next `init`.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use hoo_protocol::SessionId;
use tokio::net::{TcpListener, TcpStream};

use crate::lock;

/// What a watched source stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WatchToken {
    /// The listening socket.
    Server,
    /// A pooled connection.
    Session(SessionId),
}

#[derive(Debug, Clone)]
enum Source {
    Listener(Arc<TcpListener>),
    Stream(Arc<TcpStream>),
}

enum Ready {
    Readable(WatchToken),
    Accepted(io::Result<(TcpStream, SocketAddr)>),
}

#[derive(Debug, Default)]
struct Round {
    mask: Vec<(WatchToken, Source)>,
    seen: HashSet<WatchToken>,
    accepted: Option<(TcpStream, SocketAddr)>,
}

#[derive(Debug)]
pub struct Watcher {
    timeout_ms: AtomicU64,
    registry: Mutex<BTreeMap<WatchToken, Source>>,
    round: Mutex<Round>,
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Watcher {
    pub fn new() -> Self {
        Self {
            timeout_ms: AtomicU64::new(500),
            registry: Mutex::new(BTreeMap::new()),
            round: Mutex::new(Round::default()),
        }
    }

    /// Sets how long one [`watch`](Self::watch) may block.
    pub fn set_time_out(&self, timeout: Duration) {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.timeout_ms.store(ms, Ordering::Relaxed);
    }

    pub fn time_out(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Registers the listening socket.
    pub fn add_server(&self, listener: Arc<TcpListener>) {
        lock(&self.registry).insert(WatchToken::Server, Source::Listener(listener));
    }

    /// Registers a pooled connection.
    pub fn add_connection(&self, id: SessionId, stream: Arc<TcpStream>) {
        lock(&self.registry).insert(WatchToken::Session(id), Source::Stream(stream));
    }

    /// Unregisters `token`. Unknown tokens are ignored.
    pub fn remove(&self, token: WatchToken) {
        lock(&self.registry).remove(&token);
    }

    /// Number of registered sources.
    pub fn len(&self) -> usize {
        lock(&self.registry).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.registry).is_empty()
    }

    /// Starts a round: snapshots the registry and clears the last round's
    /// results. Returns the number of sources in the mask.
    pub fn init(&self) -> usize {
        let mask: Vec<_> = lock(&self.registry)
            .iter()
            .map(|(token, source)| (*token, source.clone()))
            .collect();
        let mut round = lock(&self.round);
        round.seen.clear();
        round.accepted = None;
        round.mask = mask;
        round.mask.len()
    }

    /// Waits for readiness on the current mask.
    ///
    /// Returns the number of ready sources, 0 if the timeout elapsed
    /// first. Everything that is ready at the moment the first source
    /// fires is collected in the same round.
    ///
    /// A round whose only event was a failed `accept` still waits out the
    /// timeout, so a listener stuck in error does not spin the caller.
    pub async fn watch(&self) -> usize {
        let mask = lock(&self.round).mask.clone();
        let timeout = self.time_out();

        let mut pending: FuturesUnordered<BoxFuture<'static, Ready>> = mask
            .into_iter()
            .map(|(token, source)| match source {
                Source::Listener(listener) => {
                    async move { Ready::Accepted(listener.accept().await) }.boxed()
                }
                Source::Stream(stream) => async move {
                    // An error here still means the next read will tell us
                    // what happened.
                    let _ = stream.readable().await;
                    Ready::Readable(token)
                }
                .boxed(),
            })
            .collect();

        let mut seen = HashSet::new();
        let mut accepted = None;
        let mut accept_failed = false;
        let mut record = |ready: Ready| match ready {
            Ready::Readable(token) => {
                seen.insert(token);
            }
            Ready::Accepted(Ok(conn)) => {
                seen.insert(WatchToken::Server);
                accepted = Some(conn);
            }
            Ready::Accepted(Err(e)) => {
                tracing::warn!(error = %e, "accept failed");
                accept_failed = true;
            }
        };

        if let Ok(Some(first)) = tokio::time::timeout(timeout, pending.next()).await {
            record(first);
            while let Some(Some(more)) = pending.next().now_or_never() {
                record(more);
            }
        }
        drop(pending);

        if accept_failed && seen.is_empty() {
            tokio::time::sleep(timeout).await;
        }

        let mut round = lock(&self.round);
        round.seen = seen;
        round.accepted = accepted;
        round.seen.len()
    }

    /// `true` if `token` was ready in the last round.
    pub fn has_seen(&self, token: WatchToken) -> bool {
        lock(&self.round).seen.contains(&token)
    }

    /// Takes the stream accepted during the last round, if any.
    pub fn take_accepted(&self) -> Option<(TcpStream, SocketAddr)> {
        lock(&self.round).accepted.take()
    }
}
