//! Address blacklist consulted when a peer is accepted.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Verdict for one peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpStatus {
    Authorised,
    Blacklisted,
}

/// Banned addresses, each with an optional expiry.
#[derive(Debug, Default)]
pub struct IpBlacklist {
    entries: HashMap<IpAddr, Option<Instant>>,
}

impl IpBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_client_blacklisted(&self, addr: IpAddr) -> IpStatus {
        match self.entries.get(&addr) {
            Some(None) => IpStatus::Blacklisted,
            Some(Some(until)) if Instant::now() < *until => IpStatus::Blacklisted,
            _ => IpStatus::Authorised,
        }
    }

    /// Bans `addr` for `duration`, or forever when `None`. Re-banning
    /// replaces the previous expiry.
    pub fn ban(&mut self, addr: IpAddr, duration: Option<Duration>) {
        let until = duration.map(|d| Instant::now() + d);
        tracing::info!(%addr, ?duration, "address blacklisted");
        self.entries.insert(addr, until);
    }

    /// Lifts a ban. Returns `true` if `addr` was listed.
    pub fn unban(&mut self, addr: IpAddr) -> bool {
        self.entries.remove(&addr).is_some()
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, until| until.is_none_or(|until| now < until));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
