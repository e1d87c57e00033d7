//! One peer connection inside the pool.

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hoo_protocol::{frame, Message, MessageKind, SessionId};
use tokio::net::TcpStream;

/// Bytes pulled off the socket per `try_read` call.
const READ_CHUNK: usize = 4096;

/// Upper bound on `try_read` calls per readiness event, so one busy peer
/// cannot starve the rest of the round.
const MAX_READS_PER_ROUND: usize = 64;

/// Outbound cap for connections created outside an engine config.
pub const DEFAULT_MAX_PENDING_OUTPUT: usize = 4 * 1024 * 1024;

/// Result of draining a readable connection.
#[derive(Debug, Default)]
pub(crate) struct ReadOutcome {
    /// Complete envelopes, already stamped with this connection's id.
    pub messages: Vec<Message>,
    /// The peer hung up, errored, or broke the framing.
    pub closed: bool,
}

/// A pool slot: a session id plus, while in use, a socket.
///
/// The socket is shared with the [`Watcher`](crate::Watcher) through an
/// `Arc`; `close` shuts the socket down so the peer sees EOF even while
/// the watcher still holds a clone.
#[derive(Debug)]
pub struct Connection {
    session_id: SessionId,
    stream: Option<Arc<TcpStream>>,
    peer_addr: Option<SocketAddr>,
    last_activity: Instant,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    max_pending_output: usize,
}

impl Connection {
    pub(crate) fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            stream: None,
            peer_addr: None,
            last_activity: Instant::now(),
            inbound: Vec::new(),
            outbound: Vec::new(),
            max_pending_output: DEFAULT_MAX_PENDING_OUTPUT,
        }
    }

    /// A connection outside the pool, used to answer a peer that is being
    /// refused.
    pub(crate) fn detached(stream: Arc<TcpStream>, peer_addr: SocketAddr) -> Self {
        let mut conn = Self::new(SessionId::NONE);
        conn.attach(stream, Some(peer_addr));
        conn
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// `true` once the socket has been closed (or before one is attached).
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Binds a freshly accepted or dialed socket to this slot.
    pub(crate) fn attach(&mut self, stream: Arc<TcpStream>, peer_addr: Option<SocketAddr>) {
        self.stream = Some(stream);
        self.peer_addr = peer_addr;
        self.last_activity = Instant::now();
        self.inbound.clear();
        self.outbound.clear();
    }

    /// Closes the socket. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = socket2::SockRef::from(stream.as_ref()).shutdown(Shutdown::Both) {
                tracing::trace!(session = %self.session_id, error = %e, "shutdown on close failed");
            }
        }
        self.inbound.clear();
        self.outbound.clear();
    }

    /// `true` if nothing has been received for longer than `timeout`.
    pub fn has_timed_out(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// `true` while some queued bytes have not reached the socket yet.
    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Bytes queued but not yet written.
    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }

    pub(crate) fn set_max_pending_output(&mut self, limit: usize) {
        self.max_pending_output = limit;
    }

    /// Frames `message` into the outbound buffer and writes as much as
    /// the socket accepts right now.
    ///
    /// # Errors
    /// - `NotConnected` if the connection is closed.
    /// - `InvalidInput` if the payload exceeds
    ///   [`MAX_PAYLOAD_LEN`](frame::MAX_PAYLOAD_LEN); nothing is queued.
    /// - `OutOfMemory` if the peer is not reading and more than the
    ///   pending-output limit is left unsent.
    /// - Otherwise the write error.
    pub fn send_message(&mut self, message: &Message) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if message.payload.len() > frame::MAX_PAYLOAD_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "payload of {} bytes exceeds the {} byte limit",
                    message.payload.len(),
                    frame::MAX_PAYLOAD_LEN
                ),
            ));
        }
        frame::encode_into(message, &mut self.outbound);
        self.flush()?;
        if self.outbound.len() > self.max_pending_output {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!(
                    "{} unsent bytes exceed the {} byte limit",
                    self.outbound.len(),
                    self.max_pending_output
                ),
            ));
        }
        Ok(())
    }

    /// Writes buffered output without blocking. Leftover bytes stay queued
    /// for the next call.
    pub fn flush(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        while !self.outbound.is_empty() {
            match stream.try_write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drains whatever the socket has and decodes complete frames.
    ///
    /// Inbound envelopes are re-stamped with this connection's session id:
    /// a peer never gets to choose which session it speaks for. A peer
    /// close-session frame counts as a hang-up; an open-session frame is a
    /// protocol violation.
    pub(crate) fn read(&mut self) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        let Some(stream) = self.stream.as_ref() else {
            outcome.closed = true;
            return outcome;
        };

        let mut chunk = [0u8; READ_CHUNK];
        for _ in 0..MAX_READS_PER_ROUND {
            match stream.try_read(&mut chunk) {
                Ok(0) => {
                    tracing::debug!(session = %self.session_id, "peer closed the connection");
                    outcome.closed = true;
                    break;
                }
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    self.last_activity = Instant::now();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(session = %self.session_id, error = %e, "read failed");
                    outcome.closed = true;
                    break;
                }
            }
        }

        // Frames received before a hang-up are still delivered.
        let mut consumed = 0;
        loop {
            match frame::decode(&self.inbound[consumed..]) {
                Ok(Some((mut message, used))) => {
                    consumed += used;
                    message.session_id = self.session_id;
                    match message.kind {
                        MessageKind::Application | MessageKind::MaxConnectionsReached => {
                            outcome.messages.push(message);
                        }
                        MessageKind::CloseSession => {
                            outcome.closed = true;
                            break;
                        }
                        MessageKind::OpenSession => {
                            tracing::warn!(session = %self.session_id, "peer sent an open-session frame");
                            outcome.closed = true;
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(session = %self.session_id, error = %e, "malformed frame");
                    outcome.closed = true;
                    break;
                }
            }
        }
        self.inbound.drain(..consumed);

        outcome
    }
}
