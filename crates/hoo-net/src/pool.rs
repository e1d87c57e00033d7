//! Fixed-capacity connection pool.
//!
//! The pool pre-allocates one [`Connection`] per slot. A slot index is the
//! session id, so ids are always in `0..capacity` and get reused once a
//! slot is released. Free slots are handed out lowest id first.
//!
//! The pool is not synchronized; the engine keeps it behind its own lock.

use std::collections::BTreeSet;
use std::time::Duration;

use hoo_protocol::SessionId;

use crate::Connection;

#[derive(Debug)]
pub struct ConnectionPool {
    slots: Vec<Connection>,
    free: BTreeSet<usize>,
    used: BTreeSet<usize>,
    timeout: Option<Duration>,
}

impl ConnectionPool {
    /// Creates a pool with `capacity` slots, all free.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|i| Connection::new(SessionId::from_index(i)))
                .collect(),
            free: (0..capacity).collect(),
            used: BTreeSet::new(),
            timeout: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of allocated slots.
    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Allocates the lowest free slot, or `None` when the pool is full.
    pub fn get_new_connection(&mut self) -> Option<&mut Connection> {
        let index = self.free.pop_first()?;
        self.used.insert(index);
        Some(&mut self.slots[index])
    }

    /// Returns the allocated connection for `id`.
    ///
    /// Free slots and out-of-range ids both yield `None`.
    pub fn get_connection(&mut self, id: SessionId) -> Option<&mut Connection> {
        let index = self.allocated_index(id)?;
        Some(&mut self.slots[index])
    }

    /// Shared-borrow variant of [`get_connection`](Self::get_connection).
    pub fn get(&self, id: SessionId) -> Option<&Connection> {
        let index = self.allocated_index(id)?;
        Some(&self.slots[index])
    }

    /// Closes and frees the slot for `id`.
    ///
    /// Returns `true` if the slot was allocated. Releasing a free slot or
    /// an unknown id does nothing, so a late duplicate release is harmless.
    pub fn release_connection(&mut self, id: SessionId) -> bool {
        let Some(index) = self.allocated_index(id) else {
            return false;
        };
        self.slots[index].close();
        self.used.remove(&index);
        self.free.insert(index);
        true
    }

    /// Lowest allocated id.
    pub fn first(&self) -> Option<SessionId> {
        self.used.first().copied().map(SessionId::from_index)
    }

    /// Next allocated id strictly after `id`.
    ///
    /// Works even if `id` itself was released in between, so callers can
    /// walk the pool while releasing.
    pub fn next_after(&self, id: SessionId) -> Option<SessionId> {
        let start = id.index().map_or(0, |i| i + 1);
        self.used.range(start..).next().copied().map(SessionId::from_index)
    }

    /// Snapshot of all allocated ids, ascending.
    pub fn allocated(&self) -> Vec<SessionId> {
        self.used.iter().copied().map(SessionId::from_index).collect()
    }

    /// Sets the idle timeout. `None` disables it.
    pub fn set_connections_time_out(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn connections_time_out(&self) -> Option<Duration> {
        self.timeout
    }

    /// Caps the unsent bytes each connection may hold.
    pub fn set_max_pending_output(&mut self, limit: usize) {
        for conn in &mut self.slots {
            conn.set_max_pending_output(limit);
        }
    }

    /// `true` if `id` is allocated and idle past the timeout.
    pub fn has_timed_out(&self, id: SessionId) -> bool {
        match (self.timeout, self.get(id)) {
            (Some(timeout), Some(conn)) => conn.has_timed_out(timeout),
            _ => false,
        }
    }

    fn allocated_index(&self, id: SessionId) -> Option<usize> {
        id.index().filter(|i| self.used.contains(i))
    }
}
