//! Caller × pattern → bucket list registry.
//!
//! The map is partitioned by a hash of the caller key. Each partition has
//! its own writer lock guarding list creation and whole-caller removal;
//! with a single shard this is one coarse lock over the whole registry.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::pool::{BucketId, BucketPool};

/// Ordered bucket handles for one (caller, pattern); index i pairs with rule i.
pub type BucketList = Arc<[BucketId]>;

type CallerEntry = HashMap<String, BucketList>;
type Shard = RwLock<HashMap<String, CallerEntry>>;

/// Sharded two-level map of live bucket lists.
#[derive(Debug)]
pub struct Registry {
    shards: Box<[Shard]>,
    hasher: RandomState,
}

impl Registry {
    /// Create a registry with `shards` partitions (at least one).
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Return the bucket list for (caller, pattern), building one of
    /// `rule_count` buckets from `pool` if none exists yet.
    pub fn resolve(
        &self,
        caller: &str,
        pattern: &str,
        rule_count: usize,
        pool: &BucketPool,
    ) -> BucketList {
        let shard = self.shard(caller);

        if let Some(list) = shard.read().get(caller).and_then(|p| p.get(pattern)) {
            return Arc::clone(list);
        }

        let mut map = shard.write();
        let patterns = map.entry(caller.to_string()).or_default();

        // Another thread may have built the list between the two locks.
        if let Some(list) = patterns.get(pattern) {
            return Arc::clone(list);
        }

        let list: BucketList = (0..rule_count).map(|_| pool.acquire()).collect();
        patterns.insert(pattern.to_string(), Arc::clone(&list));

        debug!(
            caller = %caller,
            pattern = %pattern,
            buckets = rule_count,
            "Allocated bucket list"
        );
        list
    }

    /// Current bucket list for (caller, pattern), without creating one.
    pub fn snapshot(&self, caller: &str, pattern: &str) -> Option<BucketList> {
        self.shard(caller)
            .read()
            .get(caller)
            .and_then(|p| p.get(pattern))
            .cloned()
    }

    /// Remove every bucket list of `caller` and release the buckets to `pool`.
    pub fn evict(&self, caller: &str, pool: &BucketPool) -> bool {
        let mut map = self.shard(caller).write();
        match map.remove(caller) {
            Some(patterns) => {
                release_all(patterns, pool);
                true
            }
            None => false,
        }
    }

    /// Evict many callers, taking each affected shard's lock once.
    ///
    /// Returns how many callers actually had state.
    pub fn evict_many<S: AsRef<str>>(&self, callers: &[S], pool: &BucketPool) -> usize {
        let mut by_shard: Vec<Vec<&str>> = vec![Vec::new(); self.shards.len()];
        for caller in callers {
            let caller = caller.as_ref();
            by_shard[self.shard_index(caller)].push(caller);
        }

        let mut evicted = 0;
        for (index, group) in by_shard.iter().enumerate() {
            if group.is_empty() {
                continue;
            }
            let mut map = self.shards[index].write();
            for caller in group {
                if let Some(patterns) = map.remove(*caller) {
                    release_all(patterns, pool);
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Number of callers holding any bucket state.
    pub fn caller_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    fn shard(&self, caller: &str) -> &Shard {
        &self.shards[self.shard_index(caller)]
    }

    fn shard_index(&self, caller: &str) -> usize {
        (self.hasher.hash_one(caller) % self.shards.len() as u64) as usize
    }
}

fn release_all(patterns: CallerEntry, pool: &BucketPool) {
    for list in patterns.into_values() {
        for id in list.iter() {
            pool.release(*id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_creates_once() {
        let registry = Registry::new(4);
        let pool = BucketPool::new();

        let first = registry.resolve("alice", "/api", 2, &pool);
        let second = registry.resolve("alice", "/api", 2, &pool);

        assert_eq!(first.len(), 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.capacity(), 2);
        assert_eq!(registry.caller_count(), 1);
    }

    #[test]
    fn test_patterns_get_separate_lists() {
        let registry = Registry::new(1);
        let pool = BucketPool::new();

        let a = registry.resolve("alice", "/a", 1, &pool);
        let b = registry.resolve("alice", "/b", 3, &pool);

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 3);
        assert_eq!(pool.capacity(), 4);
        assert_eq!(registry.caller_count(), 1);
    }

    #[test]
    fn test_evict_releases_every_bucket() {
        let registry = Registry::new(2);
        let pool = BucketPool::new();
        registry.resolve("alice", "/a", 1, &pool);
        registry.resolve("alice", "/b", 2, &pool);
        registry.resolve("bob", "/a", 1, &pool);

        assert!(registry.evict("alice", &pool));
        assert!(!registry.evict("alice", &pool));

        assert_eq!(pool.idle(), 3);
        assert_eq!(registry.caller_count(), 1);
        assert!(registry.snapshot("alice", "/a").is_none());
        assert!(registry.snapshot("bob", "/a").is_some());
    }

    #[test]
    fn test_evict_many_counts_only_present_callers() {
        let registry = Registry::new(8);
        let pool = BucketPool::new();
        for caller in ["a", "b", "c"] {
            registry.resolve(caller, "/p", 1, &pool);
        }

        let evicted = registry.evict_many(&["a", "c", "missing"], &pool);
        assert_eq!(evicted, 2);
        assert_eq!(registry.caller_count(), 1);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_zero_shards_means_one() {
        let registry = Registry::new(0);
        assert_eq!(registry.shard_count(), 1);
    }
}
