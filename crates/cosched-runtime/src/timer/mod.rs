//! Two-level timer index
//!
//! Suspended coroutines are indexed by deadline. The outer level is an
//! ordered map from deadline to a pooled node; the inner level is the
//! ordered set of keys sharing that deadline.
//!
//! ```text
//!   deadlines (BTreeMap<u64, node>)
//!     1005 ──► { h3 }
//!     1010 ──► { h1, h4, h7 }      keys ordered by id
//!     1250 ──► { h2 }
//! ```
//!
//! Nodes come from a fixed pool. When it runs dry, `insert` reports
//! `TimerError::PoolExhausted` and the caller decides what to do.

mod clock;
mod pool;

pub use clock::{deadline_after, now_ms};

use std::collections::BTreeMap;

use cosched_core::TimerError;

use self::pool::NodePool;

/// Deadline-ordered index of keys.
pub struct TimerIndex<K> {
    deadlines: BTreeMap<u64, usize>,
    pool: NodePool<K>,
    len: usize,
}

impl<K: Ord + Copy> TimerIndex<K> {
    /// Create an index whose node pool holds `nodes` distinct deadlines.
    pub fn new(nodes: usize) -> Self {
        Self {
            deadlines: BTreeMap::new(),
            pool: NodePool::with_capacity(nodes),
            len: 0,
        }
    }

    /// Register `key` under `deadline`.
    ///
    /// Joins the existing node when another key already waits on the
    /// same deadline, otherwise takes a node from the pool.
    pub fn insert(&mut self, key: K, deadline: u64) -> Result<(), TimerError> {
        let idx = match self.deadlines.get(&deadline) {
            Some(&idx) => idx,
            None => {
                let idx = self.pool.acquire().ok_or(TimerError::PoolExhausted)?;
                self.deadlines.insert(deadline, idx);
                idx
            }
        };
        if self.pool.get_mut(idx).members.insert(key) {
            self.len += 1;
        }
        Ok(())
    }

    /// Remove `key` from `deadline`. Returns false if it was not there.
    ///
    /// A node left empty is unlinked and recycled.
    pub fn remove(&mut self, key: K, deadline: u64) -> bool {
        let Some(&idx) = self.deadlines.get(&deadline) else {
            return false;
        };
        let node = self.pool.get_mut(idx);
        if !node.members.remove(&key) {
            return false;
        }
        self.len -= 1;
        if node.members.is_empty() {
            self.deadlines.remove(&deadline);
            self.pool.release(idx);
        }
        true
    }

    /// Smallest pending deadline.
    #[inline]
    pub fn earliest(&self) -> Option<u64> {
        self.deadlines.first_key_value().map(|(&d, _)| d)
    }

    /// Move every key with deadline `<= now` into `out`, earliest deadline
    /// first and ascending key order within a deadline. Returns how many
    /// keys were moved.
    pub fn drain_expired_into(&mut self, now: u64, out: &mut Vec<K>) -> usize {
        let mut moved = 0;
        while let Some((&deadline, &idx)) = self.deadlines.first_key_value() {
            if deadline > now {
                break;
            }
            self.deadlines.remove(&deadline);
            let node = self.pool.get_mut(idx);
            moved += node.members.len();
            out.extend(std::mem::take(&mut node.members));
            self.pool.release(idx);
        }
        self.len -= moved;
        moved
    }

    /// Allocating form of `drain_expired_into`.
    pub fn drain_expired(&mut self, now: u64) -> Vec<K> {
        let mut out = Vec::new();
        self.drain_expired_into(now, &mut out);
        out
    }

    /// Whether `key` is registered under `deadline`.
    pub fn contains(&self, key: K, deadline: u64) -> bool {
        self.deadlines
            .get(&deadline)
            .is_some_and(|&idx| self.pool.get(idx).members.contains(&key))
    }

    /// Number of registered keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Distinct deadlines currently indexed.
    #[inline]
    pub fn deadline_count(&self) -> usize {
        self.deadlines.len()
    }

    /// Nodes still free in the pool.
    #[inline]
    pub fn free_nodes(&self) -> usize {
        self.pool.available()
    }
}
