//! The outbound seam between the session layer and an engine.

use std::sync::Mutex;

use hoo_protocol::Message;

use crate::lock;

/// Something that accepts outbound envelopes.
///
/// Implemented by [`NetworkEngine`](crate::NetworkEngine). The session
/// managers only hold an `Arc<dyn MessageSink>`, which keeps them
/// independent of sockets.
pub trait MessageSink: Send + Sync + 'static {
    /// Queues `message` for its session. A close-session envelope closes
    /// the connection instead.
    fn send_message(&self, message: Message);
}

/// A [`MessageSink`] that just records what it is given.
///
/// Handy for driving session managers without a network.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Message>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<Message> {
        lock(&self.sent).clone()
    }

    /// Drains the recorded messages.
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *lock(&self.sent))
    }
}

impl MessageSink for RecordingSink {
    fn send_message(&self, message: Message) {
        lock(&self.sent).push(message);
    }
}
