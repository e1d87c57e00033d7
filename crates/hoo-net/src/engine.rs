//! The network engine: accept loop, readiness dispatch, inbound queue.
//!
//! # Threading
//!
//! [`launch`](NetworkEngine::launch) spawns the loop on the tokio runtime.
//! Callers on any task may concurrently call
//! [`send_message`](NetworkEngine::send_message),
//! [`connect`](NetworkEngine::connect), and the queue accessors.
//!
//! Two locks are involved and neither is ever held across an `.await`:
//!
//! - the *engine lock* guards the pool and the listener, and serializes
//!   `send_message` against the loop's own bookkeeping;
//! - the *queue lock* guards the inbound FIFO.
//!
//! The loop never holds the engine lock while waiting for readiness, so an
//! outbound send never waits longer than one bookkeeping step.
//!
//! # Close notifications
//!
//! Every session that the engine opened ends with exactly one
//! close-session message on the inbound queue: peer hang-up, read error,
//! idle timeout, failed write, or a close the consumer asked for through
//! `send_message`.
//!
//! Open and close messages are queued while the engine lock is held, so
//! for a reused slot the queue always reads `Close(n)` before the next
//! `Open(n)`. The queue lock is taken inside the engine lock, never the
//! other way round.

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use hoo_protocol::{Message, SessionId};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::{
    lock, Connection, ConnectionPool, EngineConfig, IpBlacklist, IpStatus, MessageSink,
    NetworkError, WatchToken, Watcher,
};

/// What sits behind the engine lock.
#[derive(Debug)]
struct EngineState {
    pool: ConnectionPool,
    listener: Option<Arc<TcpListener>>,
}

#[derive(Debug)]
struct Shared {
    config: EngineConfig,
    state: Mutex<EngineState>,
    watcher: Watcher,
    blacklist: RwLock<IpBlacklist>,
    inbound: Mutex<VecDeque<Message>>,
    notify: Notify,
    stopping: AtomicBool,
    running: AtomicBool,
}

/// A TCP server/client engine with a fixed-size connection pool.
///
/// # Example
///
/// ```no_run
/// use hoo_net::{EngineConfig, NetworkEngine};
///
/// # async fn run() -> Result<(), hoo_net::NetworkError> {
/// let engine = NetworkEngine::new(EngineConfig::with_capacity(64));
/// engine.open("", 9999).await?;
/// engine.launch();
///
/// while let Some(message) = engine.next_message().await {
///     println!("{} from {}", message.kind, message.session_id);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct NetworkEngine {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkEngine {
    pub fn new(config: EngineConfig) -> Self {
        let mut pool = ConnectionPool::new(config.max_connections);
        pool.set_connections_time_out(config.connection_timeout);
        pool.set_max_pending_output(config.max_pending_output);

        let watcher = Watcher::new();
        watcher.set_time_out(config.poll_timeout);

        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(EngineState {
                    pool,
                    listener: None,
                }),
                watcher,
                blacklist: RwLock::new(IpBlacklist::new()),
                inbound: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                stopping: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Binds and listens on `address:port`.
    ///
    /// An empty address means every local interface. Port 0 picks a free
    /// port; the bound address is returned either way.
    ///
    /// # Errors
    /// [`NetworkError::AlreadyOpen`] on a second call, otherwise resolution
    /// or socket setup failures.
    pub async fn open(&self, address: &str, port: u16) -> Result<SocketAddr, NetworkError> {
        if lock(&self.shared.state).listener.is_some() {
            return Err(NetworkError::AlreadyOpen);
        }

        let addr = resolve(address, port).await?;
        let listener = Arc::new(bind_listener(addr, self.shared.config.listen_backlog)?);
        let local = listener.local_addr().map_err(|source| NetworkError::SocketSetup {
            stage: "inspect",
            source,
        })?;

        let mut state = lock(&self.shared.state);
        if state.listener.is_some() {
            return Err(NetworkError::AlreadyOpen);
        }
        self.shared.watcher.add_server(Arc::clone(&listener));
        state.listener = Some(listener);
        tracing::info!(%local, "server socket listening");
        Ok(local)
    }

    /// Dials `address:port` and adds the connection to the pool.
    ///
    /// Returns `Ok(None)` if the dial itself fails, since an unreachable
    /// peer is an expected outcome for a client. No open-session message
    /// is queued for outbound connections: the caller already has the id.
    ///
    /// # Errors
    /// [`NetworkError::PoolExhausted`] if every slot is taken.
    pub async fn connect(
        &self,
        address: &str,
        port: u16,
    ) -> Result<Option<SessionId>, NetworkError> {
        let stream = match TcpStream::connect((address, port)).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(address, port, error = %e, "connect failed");
                return Ok(None);
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(error = %e, "set_nodelay failed");
        }
        let peer = stream.peer_addr().ok();
        let stream = Arc::new(stream);

        let mut state = lock(&self.shared.state);
        let conn = state
            .pool
            .get_new_connection()
            .ok_or(NetworkError::PoolExhausted)?;
        conn.attach(Arc::clone(&stream), peer);
        let id = conn.session_id();
        self.shared.watcher.add_connection(id, stream);
        tracing::info!(session = %id, ?peer, "connected");
        Ok(Some(id))
    }

    /// Sets the idle timeout in seconds. 0 disables it.
    pub fn set_connections_time_out(&self, seconds: u64) {
        let timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        lock(&self.shared.state)
            .pool
            .set_connections_time_out(timeout);
    }

    /// Refuses new peers from `addr`, for `duration` or forever.
    ///
    /// Connections already established are not affected.
    pub fn ban_address(&self, addr: IpAddr, duration: Option<Duration>) {
        self.shared
            .blacklist
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .ban(addr, duration);
    }

    pub fn unban_address(&self, addr: IpAddr) -> bool {
        self.shared
            .blacklist
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .unban(addr)
    }

    /// The first non-loopback IPv4 address of this host, as picked by the
    /// routing table.
    ///
    /// # Errors
    /// [`NetworkError::HostAddress`] if there is no usable route.
    pub fn get_host_ip() -> Result<IpAddr, NetworkError> {
        // Connecting a UDP socket sends nothing; it only asks the kernel
        // which local address it would route from.
        let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .map_err(NetworkError::HostAddress)?;
        socket
            .connect((Ipv4Addr::new(192, 0, 2, 1), 9))
            .map_err(NetworkError::HostAddress)?;
        let addr = socket.local_addr().map_err(NetworkError::HostAddress)?;
        Ok(addr.ip())
    }

    /// The listener's bound address, once [`open`](Self::open) succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.shared.state)
            .listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
    }

    /// Number of allocated connections.
    pub fn connection_count(&self) -> usize {
        lock(&self.shared.state).pool.len()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Starts the loop on the current tokio runtime.
    ///
    /// Open the listener or dial out first: a loop with nothing to watch
    /// exits straight away. Calling `launch` while running does nothing.
    pub fn launch(&self) {
        let mut task = lock(&self.task);
        if self.shared.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("engine already running");
            return;
        }
        self.shared.stopping.store(false, Ordering::SeqCst);
        lock(&self.shared.inbound).clear();

        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(async move { shared.run().await }));
    }

    /// Asks the loop to exit. It does so within one poll timeout.
    pub fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// Stops the loop, waits for it, and closes every socket.
    ///
    /// Each connection still open gets its close-session message, so a
    /// consumer draining [`next_message`](Self::next_message) sees every
    /// session end before it gets `None`.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "engine task failed");
            }
        }

        let mut state = lock(&self.shared.state);
        if state.listener.take().is_some() {
            self.shared.watcher.remove(WatchToken::Server);
        }
        let mut closed = Vec::new();
        for id in state.pool.allocated() {
            self.shared.watcher.remove(WatchToken::Session(id));
            state.pool.release_connection(id);
            closed.push(Message::close_session(id));
        }
        self.shared.push_inbound(closed);
        tracing::info!("engine shut down");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Queues
    // -----------------------------------------------------------------------

    /// Pops the oldest inbound message without waiting.
    pub fn get_message(&self) -> Option<Message> {
        lock(&self.shared.inbound).pop_front()
    }

    /// Waits for the next inbound message.
    ///
    /// Returns `None` once the loop is no longer running and the queue is
    /// drained.
    pub async fn next_message(&self) -> Option<Message> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.get_message() {
                return Some(message);
            }
            if !self.is_running() {
                return None;
            }
            notified.await;
        }
    }

    /// Sends `message` to its session.
    ///
    /// A close-session envelope closes and frees the connection, and
    /// queues its close notification like any other close. Unknown or free
    /// ids are ignored. A payload above
    /// [`MAX_PAYLOAD_LEN`](hoo_protocol::frame::MAX_PAYLOAD_LEN) is dropped.
    /// A write failure or an outbound buffer past
    /// [`max_pending_output`](EngineConfig::max_pending_output) closes the
    /// connection; the loop then reports it like a peer hang-up.
    pub fn send_message(&self, message: Message) {
        let id = message.session_id;
        let mut state = lock(&self.shared.state);

        if message.is_close() {
            if state.pool.release_connection(id) {
                self.shared.watcher.remove(WatchToken::Session(id));
                self.shared.push_inbound(vec![Message::close_session(id)]);
                tracing::debug!(session = %id, "connection closed on request");
            }
            return;
        }

        let Some(conn) = state.pool.get_connection(id) else {
            tracing::debug!(
                session = %id,
                kind = %message.kind,
                "dropping message for unknown session"
            );
            return;
        };
        if conn.is_closed() {
            return;
        }
        match conn.send_message(&message) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                tracing::warn!(
                    session = %id,
                    len = message.payload.len(),
                    "dropping oversized outbound payload"
                );
            }
            Err(e) => {
                tracing::debug!(session = %id, error = %e, "write failed");
                conn.close();
            }
        }
    }
}

impl MessageSink for NetworkEngine {
    fn send_message(&self, message: Message) {
        NetworkEngine::send_message(self, message);
    }
}

/// Dropping an engine aborts its loop, which releases the listener and
/// every pooled socket right away. Nothing is joined and no close
/// messages are queued; use [`shutdown`](NetworkEngine::shutdown) for an
/// orderly stop.
impl Drop for NetworkEngine {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        self.shared.notify.notify_waiters();
    }
}

// ---------------------------------------------------------------------------
// The loop
// ---------------------------------------------------------------------------

impl Shared {
    async fn run(self: Arc<Self>) {
        tracing::info!("engine loop started");

        while !self.stopping.load(Ordering::SeqCst) {
            self.delete_closed_connections();

            let watched = {
                let _state = lock(&self.state);
                self.watcher.init()
            };
            if watched == 0 {
                tracing::info!("nothing left to watch");
                break;
            }

            if self.watcher.watch().await > 0 {
                self.manage_active_client_connections();
                self.manage_active_server_connection();
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
        tracing::info!("engine loop stopped");
    }

    fn push_inbound(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        lock(&self.inbound).extend(messages);
        self.notify.notify_waiters();
    }

    /// Releases connections that failed or went idle, and flushes pending
    /// output on the rest.
    fn delete_closed_connections(&self) {
        let mut closed = Vec::new();
        {
            let mut state = lock(&self.state);
            let timed_out: Vec<SessionId> = state
                .pool
                .allocated()
                .into_iter()
                .filter(|id| state.pool.has_timed_out(*id))
                .collect();

            let mut cursor = state.pool.first();
            while let Some(id) = cursor {
                cursor = state.pool.next_after(id);
                let Some(conn) = state.pool.get_connection(id) else {
                    continue;
                };

                let release = if conn.is_closed() {
                    true
                } else if timed_out.contains(&id) {
                    tracing::info!(session = %id, "connection timed out");
                    true
                } else if conn.has_pending_output() {
                    match conn.flush() {
                        Ok(()) => false,
                        Err(e) => {
                            tracing::debug!(session = %id, error = %e, "flush failed");
                            true
                        }
                    }
                } else {
                    false
                };

                if release {
                    self.watcher.remove(WatchToken::Session(id));
                    state.pool.release_connection(id);
                    closed.push(Message::close_session(id));
                }
            }
            self.push_inbound(closed);
        }
    }

    /// Reads every connection the last round saw as readable.
    fn manage_active_client_connections(&self) {
        let mut inbound = Vec::new();
        {
            let mut state = lock(&self.state);
            for id in state.pool.allocated() {
                if !self.watcher.has_seen(WatchToken::Session(id)) {
                    continue;
                }
                let Some(conn) = state.pool.get_connection(id) else {
                    continue;
                };
                if conn.is_closed() {
                    continue;
                }

                let outcome = conn.read();
                inbound.extend(outcome.messages);
                if outcome.closed {
                    self.watcher.remove(WatchToken::Session(id));
                    state.pool.release_connection(id);
                    inbound.push(Message::close_session(id));
                }
            }
            self.push_inbound(inbound);
        }
    }

    /// Admits, rejects, or refuses the peer accepted in the last round.
    fn manage_active_server_connection(&self) {
        let Some((stream, peer)) = self.watcher.take_accepted() else {
            return;
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(error = %e, "set_nodelay failed");
        }
        let stream = Arc::new(stream);

        let status = self
            .blacklist
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_client_blacklisted(peer.ip());
        if status == IpStatus::Blacklisted {
            tracing::warn!(%peer, "refused blacklisted peer");
            Connection::detached(stream, peer).close();
            return;
        }

        let mut state = lock(&self.state);
        match state.pool.get_new_connection() {
            Some(conn) => {
                conn.attach(Arc::clone(&stream), Some(peer));
                let id = conn.session_id();
                self.watcher.add_connection(id, stream);
                self.push_inbound(vec![Message::open_session(id)]);
                tracing::info!(session = %id, %peer, "peer connected");
            }
            None => {
                tracing::warn!(%peer, "maximum connections reached, peer rejected");
                let mut conn = Connection::detached(stream, peer);
                if let Err(e) = conn.send_message(&Message::max_connections_reached()) {
                    tracing::debug!(%peer, error = %e, "rejection write failed");
                }
                conn.close();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Socket setup
// ---------------------------------------------------------------------------

async fn resolve(address: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    if address.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    let resolve_err = |source| NetworkError::Resolve {
        address: address.to_string(),
        source,
    };
    tokio::net::lookup_host((address, port))
        .await
        .map_err(resolve_err)?
        .next()
        .ok_or_else(|| resolve_err(io::ErrorKind::NotFound.into()))
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener, NetworkError> {
    let setup = |stage| move |source| NetworkError::SocketSetup { stage, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(setup("create"))?;
    socket.set_reuse_address(true).map_err(setup("configure"))?;
    socket.set_nonblocking(true).map_err(setup("configure"))?;
    socket.bind(&addr.into()).map_err(setup("bind"))?;
    let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(setup("listen"))?;

    TcpListener::from_std(socket.into()).map_err(setup("register"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_twice_fails_already_open() {
        let engine = NetworkEngine::new(EngineConfig::with_capacity(2));
        engine.open("127.0.0.1", 0).await.unwrap();
        assert!(matches!(
            engine.open("127.0.0.1", 0).await,
            Err(NetworkError::AlreadyOpen)
        ));
    }

    #[tokio::test]
    async fn test_open_empty_address_binds_all_interfaces() {
        let engine = NetworkEngine::new(EngineConfig::with_capacity(2));
        let addr = engine.open("", 0).await.unwrap();
        assert!(addr.ip().is_unspecified());
        assert_ne!(addr.port(), 0);
        assert_eq!(engine.local_addr(), Some(addr));
    }

    #[tokio::test]
    async fn test_launch_with_nothing_to_watch_stops() {
        let engine = NetworkEngine::new(EngineConfig::with_capacity(2));
        engine.launch();
        assert!(engine.next_message().await.is_none());
        engine.shutdown().await;
        assert!(!engine.is_running());
    }

    #[test]
    fn test_send_message_to_unknown_session_is_noop() {
        let engine = NetworkEngine::new(EngineConfig::with_capacity(2));
        engine.send_message(Message::application(SessionId(1), b"x".to_vec()));
        engine.send_message(Message::close_session(SessionId(7)));
        assert_eq!(engine.connection_count(), 0);
        assert!(engine.get_message().is_none());
    }

    #[tokio::test]
    async fn test_connect_unreachable_returns_none() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let engine = NetworkEngine::new(EngineConfig::with_capacity(1));
        assert!(engine.connect("127.0.0.1", port).await.unwrap().is_none());
    }
}
