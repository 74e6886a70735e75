//! Rate limit rules and the per-pattern rule registry.
//!
//! A pattern maps to an ordered list of rules. The order is significant:
//! the n-th rule of a pattern always governs the n-th bucket of every
//! caller's bucket list for that pattern.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::error::{RateKeeperError, Result};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Up to `limit` requests per `duration`, replenished once per fully
/// elapsed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    limit: u32,
    duration: Duration,
    window_nanos: i64,
}

impl Rule {
    /// Create a rule, rejecting windows whose refill arithmetic is undefined.
    pub fn new(pattern: &str, limit: u32, duration_secs: u64) -> Result<Self> {
        if duration_secs == 0 {
            return Err(RateKeeperError::InvalidRule {
                pattern: pattern.to_string(),
                reason: "duration must be greater than zero",
            });
        }

        let window_nanos = duration_secs
            .checked_mul(NANOS_PER_SEC)
            .and_then(|n| i64::try_from(n).ok())
            .ok_or_else(|| RateKeeperError::InvalidRule {
                pattern: pattern.to_string(),
                reason: "duration is too large",
            })?;

        Ok(Self {
            limit,
            duration: Duration::from_secs(duration_secs),
            window_nanos,
        })
    }

    /// Tokens granted per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Length of one refill window.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Window length in nanoseconds, always positive.
    pub fn window_nanos(&self) -> i64 {
        self.window_nanos
    }
}

/// Pattern to ordered rules. Append-only.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: HashMap<String, Vec<Rule>>,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule to `pattern`.
    ///
    /// Repeated calls append additional rules; nothing is deduplicated.
    pub fn add_rule(&mut self, pattern: &str, limit: u32, duration_secs: u64) -> Result<()> {
        let rule = Rule::new(pattern, limit, duration_secs)?;
        let rules = self.rules.entry(pattern.to_string()).or_default();
        rules.push(rule);

        debug!(
            pattern = %pattern,
            limit = limit,
            duration_secs = duration_secs,
            position = rules.len() - 1,
            "Registered rate limit rule"
        );
        Ok(())
    }

    /// Rules for `pattern` in registration order; empty if unconfigured.
    pub fn get(&self, pattern: &str) -> &[Rule] {
        self.rules.get(pattern).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All configured patterns.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Number of configured patterns.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
