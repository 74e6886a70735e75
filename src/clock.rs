//! Clock abstraction used by bucket refills and idle detection.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Source of wall-clock time, so window arithmetic can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Nanoseconds since the Unix epoch.
    fn now_nanos(&self) -> i64;

    /// Whole seconds since the Unix epoch.
    fn now_secs(&self) -> i64 {
        self.now_nanos().div_euclid(NANOS_PER_SEC)
    }
}

/// Wall clock backed by `chrono::Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        // Only fails past the year 2262.
        Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
    }
}

/// A clock that only moves when told to.
///
/// Start it at a non-zero instant: a bucket timestamp of zero means
/// "never initialized".
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `start_secs` seconds after the epoch.
    pub fn new(start_secs: i64) -> Self {
        Self {
            nanos: AtomicI64::new(start_secs.saturating_mul(NANOS_PER_SEC)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        self.nanos.fetch_add(delta, Ordering::SeqCst);
    }

    /// Move the clock backward, simulating a wall-clock step.
    pub fn rewind(&self, by: Duration) {
        let delta = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        self.nanos.fetch_sub(delta, Ordering::SeqCst);
    }

    /// Jump to an absolute nanosecond timestamp.
    pub fn set_nanos(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        let clock = SystemClock;
        assert!(clock.now_secs() > 1_577_836_800);
        assert!(clock.now_nanos() > 0);
    }

    #[test]
    fn test_manual_clock_advance_and_rewind() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_secs(), 1_000);

        clock.advance(Duration::from_millis(1_500));
        assert_eq!(clock.now_nanos(), 1_001_500_000_000);
        assert_eq!(clock.now_secs(), 1_001);

        clock.rewind(Duration::from_secs(2));
        assert_eq!(clock.now_nanos(), 999_500_000_000);
        assert_eq!(clock.now_secs(), 999);
    }

    #[test]
    fn test_manual_clock_set_nanos_jumps_absolutely() {
        let clock = ManualClock::new(1_000);
        clock.set_nanos(2_500_000_000_000);
        assert_eq!(clock.now_nanos(), 2_500_000_000_000);
        assert_eq!(clock.now_secs(), 2_500);

        // Negative timestamps floor toward earlier seconds.
        clock.set_nanos(-1);
        assert_eq!(clock.now_secs(), -1);
    }
}
