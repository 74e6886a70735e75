//! Token bucket with discrete-window refill.
//!
//! Tokens come back in whole multiples of the rule's limit, and only once
//! a full window has elapsed since the last refill. There is no partial
//! credit for sub-window time, so arithmetic stays integer-only.

use super::rules::Rule;

/// Outcome of a single refill-and-consume step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resync {
    /// Tokens available before this call consumed one. Zero means deny.
    pub available: u32,
    /// Timestamp of the last refill after this call, in epoch nanoseconds.
    pub last_refill: i64,
}

impl Resync {
    /// Whether this step granted a token.
    pub fn granted(&self) -> bool {
        self.available > 0
    }
}

/// Token state for one (caller, pattern, rule) slot.
///
/// `last_refill == 0` marks a bucket that has never been used. The bucket
/// has no lock of its own; the pool slot that holds it provides one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bucket {
    tokens: u32,
    last_refill: i64,
}

impl Bucket {
    /// Refill according to `rule` as of `now`, then try to take one token.
    pub fn resync(&mut self, rule: &Rule, now: i64) -> Resync {
        let limit = rule.limit();

        if self.last_refill == 0 {
            self.tokens = limit.saturating_sub(1);
            self.last_refill = now;
            return Resync {
                available: limit,
                last_refill: now,
            };
        }

        // A clock that stepped backward counts as zero elapsed windows.
        if now > self.last_refill {
            let windows = (now - self.last_refill) / rule.window_nanos();
            if windows > 0 {
                let refill = (windows as u64).saturating_mul(u64::from(limit));
                let tokens = u64::from(self.tokens).saturating_add(refill);
                self.tokens = tokens.min(u64::from(limit)) as u32;
                self.last_refill = now;
            }
        }

        let available = self.tokens;
        if available > 0 {
            self.tokens -= 1;
        }

        Resync {
            available,
            last_refill: self.last_refill,
        }
    }

    /// Return to the uninitialized state.
    pub fn reset(&mut self) {
        self.tokens = 0;
        self.last_refill = 0;
    }

    /// Tokens left after the most recent consumption.
    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    /// Epoch nanoseconds of the last refill, or 0 if never used.
    pub fn last_refill(&self) -> i64 {
        self.last_refill
    }

    pub fn is_initialized(&self) -> bool {
        self.last_refill != 0
    }
}
