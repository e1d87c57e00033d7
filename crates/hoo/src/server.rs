//! `HooServer` builder and server loop.
//!
//! This is the entry point for running a HOO server. It ties together all
//! the layers: two network engines (user port, admin port), the shared
//! server data, both session managers, and the player matcher.
//!
//! ```text
//! user engine  ──► user dispatch loop  ──► UserSessionManager  ─┐
//!                                      └─► MessageHandler       ├─► ServerData
//! admin engine ──► admin dispatch loop ──► AdminSessionManager ─┘
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hoo_net::{MessageSink, NetworkEngine};
use hoo_protocol::{Message, MessageKind, SessionId};
use hoo_session::{
    AccountRepository, AdminCredentials, AdminSessionManager, DisconnectReason, PlayerMatcher,
    ServerData, SessionError, UserSessionManager,
};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::AUTO_ADDRESS;
use crate::{HooError, MessageHandler, NullHandler, ServerConfig};

/// Upper bound on how long the shutdown watcher sleeps between checks of
/// the shutdown schedule.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Builder for configuring and starting a HOO server.
///
/// # Example
///
/// ```rust,ignore
/// use hoo::prelude::*;
///
/// let server = HooServer::builder(MemoryAccountRepository::new())
///     .user_address("0.0.0.0", 9000)
///     .admin_address("127.0.0.1", 9001)
///     .handler(MyHandler)
///     .build()
///     .await?;
/// server.run().await;
/// ```
pub struct HooServerBuilder<R, H> {
    config: ServerConfig,
    accounts: R,
    handler: H,
}

impl<R: AccountRepository> HooServerBuilder<R, NullHandler> {
    /// Creates a builder with default settings and no application handler.
    pub fn new(accounts: R) -> Self {
        Self {
            config: ServerConfig::default(),
            accounts,
            handler: NullHandler,
        }
    }
}

impl<R: AccountRepository, H: MessageHandler<R>> HooServerBuilder<R, H> {
    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn user_address(mut self, address: &str, port: u16) -> Self {
        self.config.user_address = address.to_string();
        self.config.user_port = port;
        self
    }

    pub fn admin_address(mut self, address: &str, port: u16) -> Self {
        self.config.admin_address = address.to_string();
        self.config.admin_port = port;
        self
    }

    /// Sets the pool size of both engines (and so the session slot count).
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.engine.max_connections = max;
        self.config.engine.listen_backlog = max.min(u32::MAX as usize) as u32;
        self
    }

    pub fn max_user_sessions(mut self, max: usize) -> Self {
        self.config.session.max_user_sessions = max;
        self
    }

    pub fn max_admin_sessions(mut self, max: usize) -> Self {
        self.config.session.max_admin_sessions = max;
        self
    }

    /// Idle timeout in seconds for both ports. 0 disables it.
    pub fn connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.connection_timeout_secs = seconds;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.engine.poll_timeout = timeout;
        self
    }

    pub fn matcher_interval(mut self, interval: Duration) -> Self {
        self.config.matcher_interval = interval;
        self
    }

    pub fn admin_credentials(mut self, login: &str, password: &str) -> Self {
        self.config.session.admin_credentials.push(AdminCredentials {
            login: login.to_string(),
            password: password.to_string(),
        });
        self
    }

    /// Sets the application handler.
    pub fn handler<H2: MessageHandler<R>>(self, handler: H2) -> HooServerBuilder<R, H2> {
        HooServerBuilder {
            config: self.config,
            accounts: self.accounts,
            handler,
        }
    }

    /// Opens both listening sockets and wires the managers together.
    ///
    /// # Errors
    /// [`HooError::Network`] if an address cannot be resolved or a port
    /// cannot be bound.
    pub async fn build(self) -> Result<HooServer<R, H>, HooError> {
        let config = self.config.validated();

        let user_engine = Arc::new(NetworkEngine::new(config.engine.clone()));
        let admin_engine = Arc::new(NetworkEngine::new(config.engine.clone()));

        let user_addr = user_engine
            .open(&listen_address(&config.user_address)?, config.user_port)
            .await?;
        let admin_addr = admin_engine
            .open(&listen_address(&config.admin_address)?, config.admin_port)
            .await?;

        let data = Arc::new(ServerData::new(
            config.session.clone(),
            self.accounts,
            Arc::clone(&user_engine) as Arc<dyn MessageSink>,
            Arc::clone(&admin_engine) as Arc<dyn MessageSink>,
        ));
        let users = Arc::new(UserSessionManager::new(Arc::clone(&data)));
        let admin = Arc::new(AdminSessionManager::new(
            Arc::clone(&data),
            Arc::clone(&users),
        ));

        info!(user = %user_addr, admin = %admin_addr, "HOO server built");
        Ok(HooServer {
            config,
            user_engine,
            admin_engine,
            data,
            users,
            admin,
            handler: Arc::new(self.handler),
            user_addr,
            admin_addr,
        })
    }
}

/// Maps the configured address to what the engine expects.
fn listen_address(address: &str) -> Result<String, HooError> {
    if address.eq_ignore_ascii_case(AUTO_ADDRESS) {
        Ok(NetworkEngine::get_host_ip()?.to_string())
    } else {
        Ok(address.to_string())
    }
}

/// A HOO server with both ports bound.
///
/// Call [`run()`](Self::run) to start serving; it returns once a scheduled
/// shutdown is due or [`stop()`](Self::stop) is called.
pub struct HooServer<R, H> {
    config: ServerConfig,
    user_engine: Arc<NetworkEngine>,
    admin_engine: Arc<NetworkEngine>,
    data: Arc<ServerData<R>>,
    users: Arc<UserSessionManager<R>>,
    admin: Arc<AdminSessionManager<R>>,
    handler: Arc<H>,
    user_addr: SocketAddr,
    admin_addr: SocketAddr,
}

impl<R: AccountRepository> HooServer<R, NullHandler> {
    /// Creates a new builder.
    pub fn builder(accounts: R) -> HooServerBuilder<R, NullHandler> {
        HooServerBuilder::new(accounts)
    }
}

impl<R: AccountRepository, H: MessageHandler<R>> HooServer<R, H> {
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The bound address of the user port.
    pub fn user_addr(&self) -> SocketAddr {
        self.user_addr
    }

    /// The bound address of the admin port.
    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    pub fn data(&self) -> &Arc<ServerData<R>> {
        &self.data
    }

    pub fn users(&self) -> &Arc<UserSessionManager<R>> {
        &self.users
    }

    pub fn admin(&self) -> &Arc<AdminSessionManager<R>> {
        &self.admin
    }

    pub fn user_engine(&self) -> &Arc<NetworkEngine> {
        &self.user_engine
    }

    pub fn admin_engine(&self) -> &Arc<NetworkEngine> {
        &self.admin_engine
    }

    /// Asks [`run`](Self::run) to return.
    pub fn stop(&self) {
        self.data.request_stop();
    }

    /// Runs both engines, both dispatch loops and the player matcher
    /// until the server is stopped or a scheduled shutdown is due, then
    /// closes every connection.
    pub async fn run(&self) {
        self.user_engine.launch();
        self.admin_engine.launch();
        info!(user = %self.user_addr, admin = %self.admin_addr, "HOO server running");

        let user_loop = tokio::spawn(dispatch(
            "user",
            Arc::clone(&self.user_engine),
            Arc::clone(&self.users),
            Arc::clone(&self.handler),
        ));
        let admin_loop = tokio::spawn(dispatch(
            "admin",
            Arc::clone(&self.admin_engine),
            Arc::clone(&self.admin),
            Arc::clone(&self.handler),
        ));

        let matcher = PlayerMatcher::new(Arc::clone(&self.data));
        let handler = Arc::clone(&self.handler);
        let interval = self.config.matcher_interval;
        let matcher_task = tokio::spawn(async move {
            matcher
                .run(interval, |first, second| handler.on_players_matched(first, second))
                .await;
        });

        self.wait_for_stop().await;
        info!("HOO server stopping");

        // Wakes the matcher even when the stop came from the schedule.
        self.data.request_stop();
        self.user_engine.shutdown().await;
        self.admin_engine.shutdown().await;

        for (name, task) in [
            ("user dispatch", user_loop),
            ("admin dispatch", admin_loop),
            ("matcher", matcher_task),
        ] {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "server task failed");
            }
        }
        info!("HOO server stopped");
    }

    async fn wait_for_stop(&self) {
        loop {
            let wait = match self.data.shutdown_schedule().await {
                Some(schedule) if schedule.is_due() => {
                    info!("scheduled shutdown reached");
                    return;
                }
                Some(schedule) => schedule.remaining().min(SHUTDOWN_CHECK_INTERVAL),
                None => SHUTDOWN_CHECK_INTERVAL,
            };
            tokio::select! {
                _ = self.data.stopped() => return,
                _ = time::sleep(wait) => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// What a dispatch loop needs from a session manager.
trait SessionPort<R: AccountRepository>: Send + Sync + 'static {
    fn open(&self, id: SessionId) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn close(&self, id: SessionId) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn is_open(&self, id: SessionId) -> impl Future<Output = bool> + Send;

    fn handle<H: MessageHandler<R>>(
        &self,
        handler: &H,
        message: Message,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

impl<R: AccountRepository> SessionPort<R> for UserSessionManager<R> {
    fn open(&self, id: SessionId) -> impl Future<Output = Result<(), SessionError>> + Send {
        self.open_session(id)
    }

    fn close(&self, id: SessionId) -> impl Future<Output = Result<(), SessionError>> + Send {
        self.close_session(id)
    }

    fn is_open(&self, id: SessionId) -> impl Future<Output = bool> + Send {
        async move {
            match self.get_session(id) {
                Ok(session) => session.lock().await.is_opened(),
                Err(_) => false,
            }
        }
    }

    fn handle<H: MessageHandler<R>>(
        &self,
        handler: &H,
        message: Message,
    ) -> impl Future<Output = Result<(), SessionError>> + Send {
        handler.handle_user_message(self, message)
    }
}

impl<R: AccountRepository> SessionPort<R> for AdminSessionManager<R> {
    fn open(&self, id: SessionId) -> impl Future<Output = Result<(), SessionError>> + Send {
        self.open_session(id)
    }

    fn close(&self, id: SessionId) -> impl Future<Output = Result<(), SessionError>> + Send {
        self.close_session(id)
    }

    fn is_open(&self, id: SessionId) -> impl Future<Output = bool> + Send {
        async move {
            match self.get_session(id) {
                Ok(session) => session.lock().await.is_opened(),
                Err(_) => false,
            }
        }
    }

    fn handle<H: MessageHandler<R>>(
        &self,
        handler: &H,
        message: Message,
    ) -> impl Future<Output = Result<(), SessionError>> + Send {
        handler.handle_admin_message(self, message)
    }
}

/// Drains `engine` until it stops, routing each message to `port`.
///
/// A session error disconnects the session: its state is closed and the
/// engine is told to drop the connection. The engine then queues the
/// usual close-session for it, which finds the session already closed.
///
/// Application messages for a session that is not open are dropped. They
/// come from a peer whose open was refused, or one already disconnected.
async fn dispatch<R, P, H>(
    port_name: &'static str,
    engine: Arc<NetworkEngine>,
    port: Arc<P>,
    handler: Arc<H>,
) where
    R: AccountRepository,
    P: SessionPort<R>,
    H: MessageHandler<R>,
{
    debug!(port = port_name, "dispatch loop started");
    while let Some(message) = engine.next_message().await {
        let id = message.session_id;
        let kind = message.kind;
        let result = match kind {
            MessageKind::OpenSession => port.open(id).await,
            MessageKind::CloseSession => port.close(id).await,
            MessageKind::Application => {
                if !port.is_open(id).await {
                    debug!(port = port_name, session = %id, "dropping message for a closed session");
                    continue;
                }
                port.handle(handler.as_ref(), message).await
            }
            MessageKind::MaxConnectionsReached => {
                debug!(port = port_name, session = %id, "ignoring max-connections envelope");
                Ok(())
            }
        };

        let Err(e) = result else { continue };
        warn!(port = port_name, session = %id, %kind, error = %e, "disconnecting session");
        if kind != MessageKind::OpenSession && kind != MessageKind::CloseSession {
            if let Err(e) = port.close(id).await {
                debug!(port = port_name, session = %id, error = %e, "session already gone");
            }
        }
        if kind != MessageKind::CloseSession {
            force_disconnect(&engine, id, &e);
        }
    }
    debug!(port = port_name, "dispatch loop stopped");
}

/// Closes `id`'s connection, telling the peer first when the reason is
/// a capacity limit.
fn force_disconnect(engine: &NetworkEngine, id: SessionId, error: &SessionError) {
    if error.disconnect_reason() == DisconnectReason::MaximumConnectionReached {
        engine.send_message(Message::new(MessageKind::MaxConnectionsReached, id));
    }
    engine.send_message(Message::close_session(id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_address_passes_plain_address_through() {
        assert_eq!(listen_address("127.0.0.1").unwrap(), "127.0.0.1");
        assert_eq!(listen_address("").unwrap(), "");
    }

    #[test]
    fn test_listen_address_auto_resolves_host_ip() {
        // Hosts without a route still fail cleanly rather than panic.
        match listen_address("AUTO") {
            Ok(address) => assert!(address.parse::<std::net::IpAddr>().is_ok()),
            Err(e) => assert!(matches!(e, HooError::Network(_))),
        }
    }
}
