//! Last-access tracking for idle detection.
//!
//! The tracker is deliberately decoupled from bucket state: it only
//! records when a caller was last seen so the sweeper can find idle
//! callers. Its lock is independent of the registry's, so a check may be
//! recorded while the same caller is being evicted. The worst outcome is
//! one spurious full reset of that caller's buckets.

mod memory;

pub use memory::DashMapTracker;

/// Thread-safe key → last-seen timestamp map.
pub trait AccessTracker: Send + Sync + std::fmt::Debug {
    /// Last-seen timestamp for `key`, or 0 if unknown.
    fn get(&self, key: &str) -> i64;

    /// Record `value` for `key`. Returns `true` if the stored value changed.
    fn set(&self, key: &str, value: i64) -> bool;

    /// Forget `key`.
    fn delete(&self, key: &str);

    /// Forget `key` only if it was last seen at `seen`. Returns `true` if
    /// the entry was removed.
    ///
    /// The default is not atomic; implementations with a native
    /// compare-and-remove should override it.
    fn delete_if_unchanged(&self, key: &str, seen: i64) -> bool {
        if self.get(key) == seen {
            self.delete(key);
            true
        } else {
            false
        }
    }

    /// At most `n` entries in unspecified order. Repeated calls should
    /// eventually cover every key.
    fn sample_up_to(&self, n: usize) -> Vec<(String, i64)>;

    /// Number of tracked keys.
    fn count(&self) -> usize;
}
