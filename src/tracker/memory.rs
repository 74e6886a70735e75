//! In-memory access tracker on top of `DashMap`.

use dashmap::DashMap;
use rand::Rng;

use super::AccessTracker;

/// Default [`AccessTracker`], sharded internally by `DashMap`.
#[derive(Debug, Default)]
pub struct DashMapTracker {
    seen: DashMap<String, i64>,
}

impl DashMapTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccessTracker for DashMapTracker {
    fn get(&self, key: &str) -> i64 {
        self.seen.get(key).map(|v| *v).unwrap_or(0)
    }

    fn set(&self, key: &str, value: i64) -> bool {
        // Hot path: the key is usually present, so skip the String allocation.
        if let Some(mut current) = self.seen.get_mut(key) {
            let changed = *current != value;
            *current = value;
            return changed;
        }

        match self.seen.insert(key.to_string(), value) {
            Some(previous) => previous != value,
            None => true,
        }
    }

    fn delete(&self, key: &str) {
        self.seen.remove(key);
    }

    fn sample_up_to(&self, n: usize) -> Vec<(String, i64)> {
        let len = self.seen.len();
        if n == 0 || len == 0 {
            return Vec::new();
        }

        // Entries never move on update, so a fixed window would keep
        // returning the same keys. Start at a random offset and wrap.
        let start = if n >= len {
            0
        } else {
            rand::thread_rng().gen_range(0..len)
        };

        let mut sample: Vec<(String, i64)> = self
            .seen
            .iter()
            .skip(start)
            .take(n)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        let missing = (n - sample.len()).min(start);
        if missing > 0 {
            sample.extend(
                self.seen
                    .iter()
                    .take(missing)
                    .map(|entry| (entry.key().clone(), *entry.value())),
            );
        }
        sample
    }

    fn delete_if_unchanged(&self, key: &str, seen: i64) -> bool {
        self.seen.remove_if(key, |_, current| *current == seen).is_some()
    }

    fn count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_defaults_to_zero() {
        let tracker = DashMapTracker::new();
        assert_eq!(tracker.get("nobody"), 0);
    }

    #[test]
    fn test_set_reports_changes() {
        let tracker = DashMapTracker::new();
        assert!(tracker.set("alice", 10));
        assert!(!tracker.set("alice", 10));
        assert!(tracker.set("alice", 11));
        assert_eq!(tracker.get("alice"), 11);
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_delete() {
        let tracker = DashMapTracker::new();
        tracker.set("alice", 10);
        tracker.delete("alice");
        tracker.delete("alice");
        assert_eq!(tracker.get("alice"), 0);
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn test_sample_is_bounded_by_n() {
        let tracker = DashMapTracker::new();
        for i in 0..10 {
            tracker.set(&format!("caller-{}", i), i);
        }

        assert_eq!(tracker.sample_up_to(0).len(), 0);
        assert_eq!(tracker.sample_up_to(3).len(), 3);
        assert_eq!(tracker.sample_up_to(10).len(), 10);
        assert_eq!(tracker.sample_up_to(50).len(), 10);
    }

    #[test]
    fn test_sample_window_moves_between_calls() {
        let tracker = DashMapTracker::new();
        for i in 0..20 {
            tracker.set(&format!("caller-{}", i), i);
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let sample = tracker.sample_up_to(5);
            assert_eq!(sample.len(), 5);
            seen.extend(sample.into_iter().map(|(key, _)| key));
        }
        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn test_sample_has_no_duplicates() {
        let tracker = DashMapTracker::new();
        for i in 0..10 {
            tracker.set(&format!("caller-{}", i), i);
        }

        for _ in 0..50 {
            let mut keys: Vec<String> = tracker.sample_up_to(7).into_iter().map(|(k, _)| k).collect();
            keys.sort();
            keys.dedup();
            assert_eq!(keys.len(), 7);
        }
    }

    #[test]
    fn test_delete_if_unchanged() {
        let tracker = DashMapTracker::new();
        tracker.set("alice", 10);

        tracker.set("alice", 20);
        assert!(!tracker.delete_if_unchanged("alice", 10));
        assert_eq!(tracker.get("alice"), 20);

        assert!(tracker.delete_if_unchanged("alice", 20));
        assert_eq!(tracker.count(), 0);
        assert!(!tracker.delete_if_unchanged("alice", 20));
    }

    #[test]
    fn test_sample_returns_stored_values() {
        let tracker = DashMapTracker::new();
        tracker.set("alice", 42);
        let sample = tracker.sample_up_to(5);
        assert_eq!(sample, vec![("alice".to_string(), 42)]);
    }
}
