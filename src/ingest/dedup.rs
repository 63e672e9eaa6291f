//! Per-channel bounded recency window of seen message ids.

use std::collections::{HashSet, VecDeque};

use crate::source::MessageId;

/// Bounded FIFO of recently seen ids paired with a membership set.
///
/// Recording an id beyond capacity evicts (and unmarks) the oldest one, so
/// lookups stay O(1) and memory stays bounded for the process lifetime.
#[derive(Debug)]
pub struct DedupWindow {
    order: VecDeque<MessageId>,
    members: HashSet<MessageId>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub fn seen(&self, id: MessageId) -> bool {
        self.members.contains(&id)
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn record(&mut self, id: MessageId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.members.remove(&oldest);
        }
        self.order.push_back(id);
        true
    }

    /// Drop every id strictly above `id`.
    ///
    /// Used when a cycle is abandoned on a transient fault so the uncommitted
    /// messages can be fetched and classified again.
    pub fn forget_above(&mut self, id: MessageId) -> usize {
        let before = self.order.len();
        self.order.retain(|seen| *seen <= id);
        self.members.retain(|seen| *seen <= id);
        before - self.order.len()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_seen() {
        let mut window = DedupWindow::new(10);
        assert!(!window.seen(5));
        assert!(window.record(5));
        assert!(window.seen(5));
        assert!(!window.record(5), "second record is a duplicate");
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_eviction_unmarks_oldest() {
        let mut window = DedupWindow::new(3);
        for id in 1..=3 {
            window.record(id);
        }
        window.record(4);
        assert_eq!(window.len(), 3);
        assert!(!window.seen(1), "oldest id should be evicted");
        assert!(window.seen(2));
        assert!(window.seen(4));
    }

    #[test]
    fn test_memory_stays_bounded() {
        let mut window = DedupWindow::new(500);
        for id in 0..10_000 {
            window.record(id);
        }
        assert_eq!(window.len(), 500);
        assert!(window.seen(9_999));
        assert!(!window.seen(9_499));
        assert!(window.seen(9_500));
    }

    #[test]
    fn test_forget_above() {
        let mut window = DedupWindow::new(10);
        for id in [100, 101, 102, 103] {
            window.record(id);
        }
        assert_eq!(window.forget_above(101), 2);
        assert!(window.seen(101));
        assert!(!window.seen(102));
        assert!(window.record(103));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut window = DedupWindow::new(0);
        assert_eq!(window.capacity(), 1);
        window.record(1);
        window.record(2);
        assert!(!window.seen(1));
        assert!(window.seen(2));
    }
}
