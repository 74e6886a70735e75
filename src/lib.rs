//! Ratekeeper - In-process Admission Control
//!
//! This crate grants or denies access to a named resource ("pattern") per
//! caller key according to token-bucket rules, and bounds its own memory by
//! periodically evicting the bucket state of callers that have gone idle.

pub mod clock;
pub mod config;
pub mod error;
pub mod eviction;
pub mod ratelimit;
pub mod tracker;

use std::sync::Arc;

use crate::config::RateKeeperConfig;
use crate::eviction::{Sweeper, SweeperConfig, SweeperHandle};
use crate::ratelimit::RateLimiter;

/// Build a limiter from `config` and start its sweeper on the current
/// tokio runtime.
pub fn init(config: &RateKeeperConfig) -> crate::error::Result<(Arc<RateLimiter>, SweeperHandle)> {
    config.validate()?;
    let limiter = Arc::new(RateLimiter::from_config(config)?);
    let sweeper = Sweeper::new(Arc::clone(&limiter), SweeperConfig::from(&config.sweeper));
    Ok((limiter, sweeper.spawn()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_builds_limiter_and_sweeper() {
        let config = RateKeeperConfig::from_yaml(
            "rules:\n  - pattern: /api\n    limit: 2\n    duration_secs: 60\n",
        )
        .unwrap();

        let (limiter, sweeper) = init(&config).unwrap();
        assert!(limiter.check_access("alice", "/api"));
        assert!(limiter.check_access("alice", "/api"));
        assert!(!limiter.check_access("alice", "/api"));
        assert!(limiter.check_access("alice", "/unlisted"));

        sweeper.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        let mut config = RateKeeperConfig::default();
        config.sweeper.interval_minutes = 0;
        assert!(init(&config).is_err());
    }
}
