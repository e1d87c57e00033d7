//! Process-wide session state shared by every manager.
//!
//! [`ServerData`] is built once at startup and handed to the managers as an
//! `Arc`. Each collection has its own lock and every lock is held for the
//! list operation only. Code that needs a session's fields snapshots the
//! list, drops the list lock, and only then locks the session.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hoo_net::MessageSink;
use hoo_protocol::SessionId;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::{AccountRepository, Session, SessionConfig};

/// A scheduled shutdown: when it was requested and how long until it
/// happens.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownSchedule {
    pub requested_at: Instant,
    pub period: Duration,
}

impl ShutdownSchedule {
    /// Time left before the shutdown, zero once it is due.
    pub fn remaining(&self) -> Duration {
        self.period.saturating_sub(self.requested_at.elapsed())
    }

    pub fn is_due(&self) -> bool {
        self.requested_at.elapsed() >= self.period
    }
}

pub struct ServerData<R> {
    config: SessionConfig,
    pub(crate) user_sessions: Vec<Arc<Session>>,
    pub(crate) admin_sessions: Vec<Arc<Session>>,
    pub(crate) opened_user_sessions: Mutex<Vec<Arc<Session>>>,
    pub(crate) opened_admin_sessions: Mutex<Vec<Arc<Session>>>,
    pub(crate) looking_for_opponent: Mutex<VecDeque<Arc<Session>>>,
    shutdown: Mutex<Option<ShutdownSchedule>>,
    accounts: R,
    user_engine: Arc<dyn MessageSink>,
    admin_engine: Arc<dyn MessageSink>,
    stopped: AtomicBool,
    stop_signal: Notify,
}

impl<R: AccountRepository> ServerData<R> {
    /// Allocates `config.max_sessions` user and admin sessions.
    pub fn new(
        config: SessionConfig,
        accounts: R,
        user_engine: Arc<dyn MessageSink>,
        admin_engine: Arc<dyn MessageSink>,
    ) -> Self {
        let sessions = |n: usize| -> Vec<Arc<Session>> {
            (0..n)
                .map(|i| Arc::new(Session::new(SessionId::from_index(i))))
                .collect()
        };
        Self {
            user_sessions: sessions(config.max_sessions),
            admin_sessions: sessions(config.max_sessions),
            opened_user_sessions: Mutex::new(Vec::new()),
            opened_admin_sessions: Mutex::new(Vec::new()),
            looking_for_opponent: Mutex::new(VecDeque::new()),
            shutdown: Mutex::new(None),
            config,
            accounts,
            user_engine,
            admin_engine,
            stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
        }
    }
}

impl<R> ServerData<R> {
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn accounts(&self) -> &R {
        &self.accounts
    }

    pub fn user_engine(&self) -> &Arc<dyn MessageSink> {
        &self.user_engine
    }

    pub fn admin_engine(&self) -> &Arc<dyn MessageSink> {
        &self.admin_engine
    }

    /// Records a shutdown `seconds` from now, replacing any earlier one.
    pub async fn schedule_shutdown(&self, seconds: u32) {
        *self.shutdown.lock().await = Some(ShutdownSchedule {
            requested_at: Instant::now(),
            period: Duration::from_secs(u64::from(seconds)),
        });
    }

    pub async fn shutdown_schedule(&self) -> Option<ShutdownSchedule> {
        *self.shutdown.lock().await
    }

    /// Seconds left before the scheduled shutdown, 0 once it is due, or
    /// -1 if none is scheduled.
    pub async fn time_before_shutdown(&self) -> i32 {
        match self.shutdown_schedule().await {
            Some(schedule) => i32::try_from(schedule.remaining().as_secs()).unwrap_or(i32::MAX),
            None => -1,
        }
    }

    /// Tells long-running session tasks (the matcher, dispatch loops) to
    /// finish.
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once [`request_stop`](Self::request_stop) has been called.
    pub async fn stopped(&self) {
        loop {
            let notified = self.stop_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryAccountRepository;
    use hoo_net::RecordingSink;

    fn data() -> ServerData<MemoryAccountRepository> {
        ServerData::new(
            SessionConfig {
                max_sessions: 4,
                ..Default::default()
            },
            MemoryAccountRepository::new(),
            Arc::new(RecordingSink::new()),
            Arc::new(RecordingSink::new()),
        )
    }

    #[test]
    fn test_new_allocates_sessions_per_slot() {
        let data = data();
        assert_eq!(data.user_sessions.len(), 4);
        assert_eq!(data.admin_sessions[3].id(), SessionId(3));
    }

    #[tokio::test]
    async fn test_time_before_shutdown_none_is_minus_one() {
        assert_eq!(data().time_before_shutdown().await, -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_before_shutdown_counts_down_to_zero() {
        let data = data();
        data.schedule_shutdown(60).await;
        assert_eq!(data.time_before_shutdown().await, 60);

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(data.time_before_shutdown().await, 15);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(data.time_before_shutdown().await, 0);
        assert!(data.shutdown_schedule().await.unwrap().is_due());
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_request_stop() {
        let data = Arc::new(data());
        let waiter = tokio::spawn({
            let data = Arc::clone(&data);
            async move { data.stopped().await }
        });
        data.request_stop();
        waiter.await.unwrap();
        assert!(data.is_stopped());
    }
}
