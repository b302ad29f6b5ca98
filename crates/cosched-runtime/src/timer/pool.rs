//! Fixed-capacity pool of timer nodes
//!
//! Nodes are created once at construction and recycled LIFO, so the
//! timer index never allocates a node after startup.

use std::collections::BTreeSet;

/// All keys sharing one deadline.
#[derive(Debug)]
pub(super) struct TimerNode<K> {
    pub members: BTreeSet<K>,
}

pub(super) struct NodePool<K> {
    nodes: Vec<TimerNode<K>>,
    free: Vec<usize>,
}

impl<K: Ord> NodePool<K> {
    pub fn with_capacity(capacity: usize) -> Self {
        let nodes = (0..capacity)
            .map(|_| TimerNode { members: BTreeSet::new() })
            .collect();
        // Reverse so slot 0 is handed out first
        let free = (0..capacity).rev().collect();
        Self { nodes, free }
    }

    /// Take a free node, or `None` when every node is in use.
    pub fn acquire(&mut self) -> Option<usize> {
        self.free.pop()
    }

    /// Return an empty node to the pool.
    pub fn release(&mut self, idx: usize) {
        debug_assert!(self.nodes[idx].members.is_empty());
        self.nodes[idx].members.clear();
        self.free.push(idx);
    }

    #[inline]
    pub fn get(&self, idx: usize) -> &TimerNode<K> {
        &self.nodes[idx]
    }

    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> &mut TimerNode<K> {
        &mut self.nodes[idx]
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_empty() {
        let mut pool: NodePool<u32> = NodePool::with_capacity(2);
        assert_eq!(pool.acquire(), Some(0));
        assert_eq!(pool.acquire(), Some(1));
        assert_eq!(pool.acquire(), None);

        pool.release(0);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.acquire(), Some(0));
        assert!(pool.get(0).members.is_empty());
    }
}
