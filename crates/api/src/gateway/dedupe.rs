//! Per-connection suppression of repeated output lines.

use std::collections::{HashSet, VecDeque};

/// Capped set of already-delivered output lines.
///
/// On overflow the window halves deterministically, keeping the
/// most-recently-seen entries so fresh output is never re-suppressed by
/// evictions.
pub(crate) struct DedupeWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
    retain: usize,
}

impl DedupeWindow {
    pub(crate) fn new(capacity: usize, retain: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            retain,
        }
    }

    /// Record a line. Returns true when it has not been seen before
    /// (i.e. it should be delivered).
    pub(crate) fn insert(&mut self, line: &str) -> bool {
        if self.seen.contains(line) {
            return false;
        }

        self.seen.insert(line.to_string());
        self.order.push_back(line.to_string());

        if self.seen.len() > self.capacity {
            while self.order.len() > self.retain {
                if let Some(evicted) = self.order.pop_front() {
                    self.seen.remove(&evicted);
                }
            }
        }

        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }
}

impl Default for DedupeWindow {
    fn default() -> Self {
        Self::new(5000, 2000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppresses_repeats() {
        let mut window = DedupeWindow::default();
        assert!(window.insert("Scanning 80/tcp"));
        assert!(!window.insert("Scanning 80/tcp"));
        assert!(window.insert("Scanning 443/tcp"));
    }

    #[test]
    fn test_overflow_halves_to_most_recent() {
        let mut window = DedupeWindow::new(10, 4);
        for i in 0..11 {
            assert!(window.insert(&format!("line {i}")));
        }
        assert_eq!(window.len(), 4);

        // The most recent entries survive the halving, the oldest do not.
        assert!(!window.insert("line 10"));
        assert!(!window.insert("line 7"));
        assert!(window.insert("line 0"));
    }
}
