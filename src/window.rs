//! Capped FIFO window.
//!
//! The one bounded-memory primitive behind event histories, per-symbol time
//! series, and drift samples: insertion-ordered, capacity-bounded, oldest
//! evicted first.

use serde::Serialize;
use std::collections::VecDeque;

/// Insertion-ordered window holding at most `capacity` entries.
#[derive(Debug, Clone, Serialize)]
pub struct Window<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> Window<T> {
    /// A window that keeps the newest `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting and returning the oldest one when full.
    /// O(1) amortized.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest entry, if any.
    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Oldest-to-newest iteration.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Clone> Window<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_below_capacity_keeps_everything() {
        let mut window = Window::new(3);
        assert_eq!(window.push(1), None);
        assert_eq!(window.push(2), None);
        assert_eq!(window.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_eviction_keeps_newest_in_order() {
        // capacity C = 3, append C + K with K = 4
        let mut window = Window::new(3);
        for n in 1..=7 {
            window.push(n);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.to_vec(), vec![5, 6, 7]);
        assert_eq!(window.latest(), Some(&7));
    }

    #[test]
    fn test_eviction_returns_oldest() {
        let mut window = Window::new(2);
        window.push("a");
        window.push("b");
        assert_eq!(window.push("c"), Some("a"));
    }

    #[test]
    fn test_zero_capacity_clamped_to_one() {
        let mut window = Window::new(0);
        window.push(1);
        window.push(2);
        assert_eq!(window.to_vec(), vec![2]);
    }
}
