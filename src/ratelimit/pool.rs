//! Arena of reusable bucket slots.
//!
//! Buckets live in slots addressed by a stable index. Each slot owns its
//! mutex for its whole life; releasing a bucket resets the state inside
//! the slot and bumps its generation, so a handle held across an eviction
//! is recognised as stale instead of silently reading another caller's
//! tokens.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::bucket::{Bucket, Resync};
use super::rules::Rule;

/// Handle to one pooled bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketId {
    index: usize,
    generation: u64,
}

impl BucketId {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    bucket: Bucket,
}

/// Pool of bucket slots, grown on demand and never shrunk.
#[derive(Debug, Default)]
pub struct BucketPool {
    slots: RwLock<Vec<Arc<Mutex<Slot>>>>,
    free: Mutex<Vec<usize>>,
}

impl BucketPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a bucket in the uninitialized state, reusing a free slot
    /// when one is available.
    pub fn acquire(&self) -> BucketId {
        let reused = self.free.lock().pop();
        if let Some(index) = reused {
            let slot = self.slot(index);
            let generation = slot.lock().generation;
            trace!(index = index, generation = generation, "Reusing pooled bucket");
            return BucketId { index, generation };
        }

        let mut slots = self.slots.write();
        slots.push(Arc::new(Mutex::new(Slot::default())));
        BucketId {
            index: slots.len() - 1,
            generation: 0,
        }
    }

    /// Reset the bucket and return its slot to the free list.
    ///
    /// The caller must already have unlinked `id` from every live bucket
    /// list. Returns `false` if `id` was already released.
    pub fn release(&self, id: BucketId) -> bool {
        let Some(slot) = self.try_slot(id.index) else {
            return false;
        };

        {
            let mut slot = slot.lock();
            if slot.generation != id.generation {
                return false;
            }
            slot.bucket.reset();
            slot.generation = slot.generation.wrapping_add(1);
        }

        self.free.lock().push(id.index);
        true
    }

    /// Run the refill/consume step on `id` under its slot lock.
    ///
    /// Returns `None` if the bucket was released since `id` was handed out.
    pub fn resync(&self, id: BucketId, rule: &Rule, now: i64) -> Option<Resync> {
        self.with_bucket(id, |bucket| bucket.resync(rule, now))
    }

    /// Tokens left in `id`, or `None` for a stale handle.
    pub fn tokens(&self, id: BucketId) -> Option<u32> {
        self.with_bucket(id, |bucket| bucket.tokens())
    }

    /// Number of slots ever allocated.
    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }

    /// Number of slots waiting to be reused.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn with_bucket<R>(&self, id: BucketId, f: impl FnOnce(&mut Bucket) -> R) -> Option<R> {
        let slot = self.try_slot(id.index)?;
        let mut slot = slot.lock();
        if slot.generation != id.generation {
            return None;
        }
        Some(f(&mut slot.bucket))
    }

    fn try_slot(&self, index: usize) -> Option<Arc<Mutex<Slot>>> {
        self.slots.read().get(index).cloned()
    }

    // Indices on the free list always refer to allocated slots.
    fn slot(&self, index: usize) -> Arc<Mutex<Slot>> {
        Arc::clone(&self.slots.read()[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000_000_000;

    fn rule(limit: u32) -> Rule {
        Rule::new("test", limit, 60).unwrap()
    }

    #[test]
    fn test_acquire_grows_when_empty() {
        let pool = BucketPool::new();
        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a.index(), b.index());
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_release_then_acquire_reuses_slot() {
        let pool = BucketPool::new();
        let a = pool.acquire();
        pool.resync(a, &rule(3), T0).unwrap();

        assert!(pool.release(a));
        assert_eq!(pool.idle(), 1);

        let b = pool.acquire();
        assert_eq!(b.index(), a.index());
        assert_ne!(b, a);
        assert_eq!(pool.capacity(), 1);

        // Reused bucket starts fresh: full limit on first use.
        let r = pool.resync(b, &rule(3), T0 + 1).unwrap();
        assert_eq!(r.available, 3);
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let pool = BucketPool::new();
        let a = pool.acquire();
        pool.release(a);
        let b = pool.acquire();

        assert!(pool.resync(a, &rule(3), T0).is_none());
        assert!(pool.tokens(a).is_none());
        assert_eq!(pool.tokens(b), Some(0));
    }

    #[test]
    fn test_double_release_is_ignored() {
        let pool = BucketPool::new();
        let a = pool.acquire();
        assert!(pool.release(a));
        assert!(!pool.release(a));
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_tokens_reflect_consumption() {
        let pool = BucketPool::new();
        let a = pool.acquire();
        pool.resync(a, &rule(5), T0);
        pool.resync(a, &rule(5), T0);
        assert_eq!(pool.tokens(a), Some(3));
    }
}
