//! Periodic eviction of idle callers.
//!
//! Each tick samples a bounded number of tracked callers, drops the bucket
//! state of those idle longer than the timeout, then forgets them in the
//! tracker. Sampling is partial: a large population is cleaned up over
//! several ticks rather than by holding registry locks for a full scan.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SweeperSettings;
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// Longest supported time between ticks.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Runtime settings for a [`Sweeper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Time between ticks; the first tick happens one interval after start.
    /// Values above [`MAX_INTERVAL`] are clamped.
    pub interval: Duration,
    /// Maximum callers examined per tick.
    pub sample_size: usize,
    /// How long a caller must go unseen before eviction.
    pub idle_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::from(&SweeperSettings::default())
    }
}

impl From<&SweeperSettings> for SweeperConfig {
    fn from(settings: &SweeperSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_minutes.saturating_mul(60)),
            sample_size: settings.sample_size,
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
        }
    }
}

/// What a single sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tracker entries examined.
    pub sampled: usize,
    /// Sampled callers found idle.
    pub idle: usize,
    /// Idle callers that still had bucket state.
    pub evicted: usize,
}

/// Idle-caller eviction loop for one [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct Sweeper {
    limiter: Arc<RateLimiter>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(limiter: Arc<RateLimiter>, config: SweeperConfig) -> Self {
        Self { limiter, config }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Run one sweep synchronously.
    pub fn sweep_once(&self) -> SweepReport {
        let tracker = self.limiter.tracker();
        let now = self.limiter.clock().now_secs();
        let idle_secs = i64::try_from(self.config.idle_timeout.as_secs()).unwrap_or(i64::MAX);

        let sample = tracker.sample_up_to(self.config.sample_size);
        let sampled = sample.len();

        let idle: Vec<(String, i64)> = sample
            .into_iter()
            .filter(|(_, last_seen)| last_seen.saturating_add(idle_secs) < now)
            .collect();

        if idle.is_empty() {
            return SweepReport {
                sampled,
                ..SweepReport::default()
            };
        }

        let callers: Vec<&str> = idle.iter().map(|(caller, _)| caller.as_str()).collect();
        let evicted = self.limiter.evict_callers(&callers);

        // Outside the registry locks. A caller checked since the sample keeps
        // its entry, so any list it just rebuilt stays reclaimable.
        for (caller, last_seen) in &idle {
            tracker.delete_if_unchanged(caller, *last_seen);
        }

        debug!(
            sampled = sampled,
            idle = idle.len(),
            evicted = evicted,
            "Evicted idle callers"
        );

        SweepReport {
            sampled,
            idle: idle.len(),
            evicted,
        }
    }

    /// Start the loop on the current tokio runtime.
    ///
    /// Dropping the returned handle leaves the loop running until the
    /// runtime shuts down; use [`SweeperHandle::shutdown`] to stop it.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(shutdown_rx));
        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        // `interval_at` rejects a zero period, and `Instant` arithmetic
        // panics on overflow.
        let period = self.config.interval.clamp(Duration::from_millis(1), MAX_INTERVAL);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = period.as_secs_f64(),
            sample_size = self.config.sample_size,
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "Sweeper started"
        );

        // False once the handle is dropped without asking for shutdown.
        let mut listening = true;

        loop {
            tokio::select! {
                signal = &mut shutdown, if listening => {
                    if signal.is_ok() {
                        info!("Sweeper stopped");
                        break;
                    }
                    listening = false;
                }
                _ = ticker.tick() => {
                    // One bad tick must never end the loop.
                    match self.tick().await {
                        Ok(report) => debug!(
                            sampled = report.sampled,
                            evicted = report.evicted,
                            "Sweep complete"
                        ),
                        Err(e) => warn!(error = %e, "Sweep failed, retrying next tick"),
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<SweepReport> {
        let sweeper = self.clone();
        let report = tokio::task::spawn_blocking(move || sweeper.sweep_once()).await?;
        Ok(report)
    }
}

/// Handle to a running sweeper loop.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        // The loop may already be gone if the runtime is shutting down.
        let _ = self.shutdown.send(());
        self.task.await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
