//! Pairs up users waiting for a quick match.
//!
//! The waiting list is FIFO: the two sessions that have waited longest are
//! paired first. A session that cancelled or disconnected between being
//! queued and being matched is skipped; its would-be partner goes back to
//! the front of the list.
//!
//! ```ignore
//! let matcher = PlayerMatcher::new(Arc::clone(&data));
//! tokio::spawn(async move {
//!     matcher
//!         .run(Duration::from_secs(1), |a, b| start_game(a, b))
//!         .await
//! });
//! ```

use std::sync::Arc;
use std::time::Duration;

use hoo_protocol::SessionId;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::{AccountRepository, QuickMatchStatus, ServerData, Session};

pub struct PlayerMatcher<R> {
    data: Arc<ServerData<R>>,
}

impl<R: AccountRepository> PlayerMatcher<R> {
    pub fn new(data: Arc<ServerData<R>>) -> Self {
        Self { data }
    }

    /// Takes as many pairs off the waiting list as it can.
    ///
    /// Matched sessions are reset to `NotWaiting`.
    pub async fn match_players(&self) -> Vec<(SessionId, SessionId)> {
        let mut pairs = Vec::new();
        loop {
            let candidates: [Arc<Session>; 2] = {
                let mut waiting = self.data.looking_for_opponent.lock().await;
                match (waiting.pop_front(), waiting.pop_front()) {
                    (Some(a), Some(b)) => [a, b],
                    (Some(a), None) => {
                        waiting.push_front(a);
                        break;
                    }
                    _ => break,
                }
            };

            let mut ready = Vec::with_capacity(2);
            for session in candidates {
                let mut state = session.lock().await;
                if state.quick_match_status() == QuickMatchStatus::LookingForOpponent {
                    state.set_quick_match_status(QuickMatchStatus::NotWaiting);
                    drop(state);
                    ready.push(session);
                }
            }

            match ready.as_slice() {
                [a, b] => {
                    debug!(first = %a.id(), second = %b.id(), "players matched");
                    pairs.push((a.id(), b.id()));
                }
                [single] => {
                    single
                        .lock()
                        .await
                        .set_quick_match_status(QuickMatchStatus::LookingForOpponent);
                    self.data
                        .looking_for_opponent
                        .lock()
                        .await
                        .push_front(Arc::clone(single));
                }
                _ => {}
            }
        }
        pairs
    }

    /// Matches players every `interval` and hands each pair to
    /// `on_match`, until the server data is told to stop.
    pub async fn run<F>(&self, interval: Duration, mut on_match: F)
    where
        F: FnMut(SessionId, SessionId) + Send,
    {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(?interval, "player matcher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for (a, b) in self.match_players().await {
                        on_match(a, b);
                    }
                }
                _ = self.data.stopped() => break,
            }
        }
        info!("player matcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryAccountRepository, SessionConfig, UserSessionManager};
    use hoo_net::RecordingSink;
    use std::sync::Mutex;

    fn setup() -> (UserSessionManager<MemoryAccountRepository>, PlayerMatcher<MemoryAccountRepository>) {
        let data = Arc::new(ServerData::new(
            SessionConfig {
                max_sessions: 8,
                ..Default::default()
            },
            MemoryAccountRepository::new(),
            Arc::new(RecordingSink::new()),
            Arc::new(RecordingSink::new()),
        ));
        (
            UserSessionManager::new(Arc::clone(&data)),
            PlayerMatcher::new(data),
        )
    }

    async fn queue(users: &UserSessionManager<MemoryAccountRepository>, ids: &[i32]) {
        for &id in ids {
            users.open_session(SessionId(id)).await.unwrap();
            assert!(users.quick_match(SessionId(id)).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_match_players_pairs_in_fifo_order() {
        let (users, matcher) = setup();
        queue(&users, &[3, 1, 4, 0, 5]).await;

        let pairs = matcher.match_players().await;

        assert_eq!(
            pairs,
            vec![(SessionId(3), SessionId(1)), (SessionId(4), SessionId(0))]
        );
        assert_eq!(users.looking_for_opponent().await, vec![SessionId(5)]);
        let state = users.get_session(SessionId(3)).unwrap().lock().await;
        assert_eq!(state.quick_match_status(), QuickMatchStatus::NotWaiting);
    }

    #[tokio::test]
    async fn test_match_players_matched_session_can_requeue() {
        let (users, matcher) = setup();
        queue(&users, &[0, 1]).await;
        matcher.match_players().await;

        assert!(users.quick_match(SessionId(0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_match_players_skips_stale_entry() {
        let (users, matcher) = setup();
        queue(&users, &[0, 1, 2]).await;
        // Status reset without leaving the list, as if a cancel were in flight.
        users
            .get_session(SessionId(1))
            .unwrap()
            .lock()
            .await
            .set_quick_match_status(QuickMatchStatus::NotWaiting);

        let pairs = matcher.match_players().await;

        assert_eq!(pairs, vec![(SessionId(0), SessionId(2))]);
        assert!(users.looking_for_opponent().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_request_stop() {
        let (users, matcher) = setup();
        queue(&users, &[0, 1]).await;
        let matched = Arc::new(Mutex::new(Vec::new()));

        let data = Arc::clone(users.data());
        let recorder = Arc::clone(&matched);
        let task = tokio::spawn(async move {
            matcher
                .run(Duration::from_millis(10), move |a, b| {
                    recorder.lock().unwrap().push((a, b));
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        data.request_stop();
        task.await.unwrap();

        assert_eq!(*matched.lock().unwrap(), vec![(SessionId(0), SessionId(1))]);
    }
}
