//! Core rate limiter implementation.

use std::sync::Arc;

use tracing::{debug, trace};

use super::pool::BucketPool;
use super::registry::Registry;
use super::rules::RuleSet;
use crate::clock::{Clock, SystemClock};
use crate::config::RateKeeperConfig;
use crate::error::Result;
use crate::tracker::{AccessTracker, DashMapTracker};

/// Default number of registry partitions.
pub const DEFAULT_SHARDS: usize = 16;

/// Grants or denies access to a pattern per caller key.
///
/// Rules are registered through `&mut self` before the limiter is shared,
/// so they can never change under live traffic. Once shared (typically in
/// an `Arc`), [`check_access`](Self::check_access) is safe to call from
/// any number of threads.
#[derive(Debug)]
pub struct RateLimiter {
    rules: RuleSet,
    registry: Registry,
    pool: BucketPool,
    tracker: Arc<dyn AccessTracker>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter with the system clock and an in-memory tracker.
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            registry: Registry::new(DEFAULT_SHARDS),
            pool: BucketPool::new(),
            tracker: Arc::new(DashMapTracker::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Build a limiter from loaded configuration.
    pub fn from_config(config: &RateKeeperConfig) -> Result<Self> {
        let rules = config.build_rule_set()?;
        Ok(Self::new(rules).with_shards(config.registry.shards))
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the last-access tracker.
    pub fn with_tracker(mut self, tracker: Arc<dyn AccessTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Set the number of registry partitions. One shard serializes all
    /// bucket allocation behind a single lock.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.registry = Registry::new(shards);
        self
    }

    /// Append a rule to `pattern`.
    pub fn add_rule(&mut self, pattern: &str, limit: u32, duration_secs: u64) -> Result<()> {
        self.rules.add_rule(pattern, limit, duration_secs)
    }

    /// Check whether `caller` may access `pattern` right now.
    ///
    /// Rules are evaluated in registration order and the first rule without
    /// a token denies the request. Rules evaluated before it keep the token
    /// they consumed.
    pub fn check_access(&self, caller: &str, pattern: &str) -> bool {
        let rules = self.rules.get(pattern);
        if rules.is_empty() {
            return true;
        }

        trace!(caller = %caller, pattern = %pattern, "Checking access");

        // Refreshed even if the request ends up denied.
        self.tracker.set(caller, self.clock.now_secs());

        let mut buckets = self
            .registry
            .resolve(caller, pattern, rules.len(), &self.pool);

        let mut index = 0;
        while index < rules.len() {
            let now = self.clock.now_nanos();
            match self.pool.resync(buckets[index], &rules[index], now) {
                Some(resync) if resync.granted() => index += 1,
                Some(_) => {
                    debug!(
                        caller = %caller,
                        pattern = %pattern,
                        rule = index,
                        limit = rules[index].limit(),
                        "Rate limit exceeded"
                    );
                    return false;
                }
                None => {
                    // Evicted mid-check: continue on the replacement list.
                    debug!(caller = %caller, pattern = %pattern, "Bucket list evicted during check");
                    buckets = self
                        .registry
                        .resolve(caller, pattern, rules.len(), &self.pool);
                }
            }
        }

        true
    }

    /// Drop all bucket state for `callers`, returning their buckets to the pool.
    ///
    /// Does not touch the access tracker. Returns the number of callers that
    /// had state.
    pub fn evict_callers<S: AsRef<str>>(&self, callers: &[S]) -> usize {
        self.registry.evict_many(callers, &self.pool)
    }

    /// Tokens left in each of the caller's buckets for `pattern`, in rule
    /// order. `None` if no bucket list exists.
    pub fn tokens_remaining(&self, caller: &str, pattern: &str) -> Option<Vec<u32>> {
        let buckets = self.registry.snapshot(caller, pattern)?;
        buckets.iter().map(|id| self.pool.tokens(*id)).collect()
    }

    /// Number of callers currently holding bucket state.
    pub fn caller_count(&self) -> usize {
        self.registry.caller_count()
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn tracker(&self) -> &Arc<dyn AccessTracker> {
        &self.tracker
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn pool(&self) -> &BucketPool {
        &self.pool
    }
}
