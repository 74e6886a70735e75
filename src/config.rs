//! Configuration management for Ratekeeper.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RateKeeperError, Result};
use crate::ratelimit::RuleSet;

/// Environment variable prefix for overrides, e.g. `RATEKEEPER__SWEEPER__SAMPLE_SIZE`.
const ENV_PREFIX: &str = "RATEKEEPER";

/// Main configuration for an embedded limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateKeeperConfig {
    /// Idle-eviction sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperSettings,

    /// Bucket registry configuration
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Rules, in registration order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSettings {
    /// Minutes between sweeps
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Maximum tracked callers examined per sweep
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Seconds without a check after which a caller is idle
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            sample_size: default_sample_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_interval_minutes() -> u64 {
    1
}

fn default_sample_size() -> usize {
    1000
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

/// Bucket registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Number of independently locked partitions
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            shards: default_shards(),
        }
    }
}

fn default_shards() -> usize {
    crate::ratelimit::DEFAULT_SHARDS
}

/// One rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Protected resource identifier
    pub pattern: String,
    /// Requests allowed per window
    pub limit: u32,
    /// Window length in seconds
    pub duration_secs: u64,
}

impl RateKeeperConfig {
    /// Load configuration from a file, with environment overrides.
    ///
    /// The format is inferred from the file extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(RateKeeperError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("configuration file not found: {}", path.display()),
            )));
        }

        let config: RateKeeperConfig = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RateKeeperError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateKeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RateKeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sweeper.interval_minutes == 0 {
            return Err(RateKeeperError::Config(
                "sweeper.interval_minutes must be greater than zero".to_string(),
            ));
        }
        if self.sweeper.interval_minutes.saturating_mul(60) > crate::eviction::MAX_INTERVAL.as_secs() {
            return Err(RateKeeperError::Config(format!(
                "sweeper.interval_minutes must be at most {}",
                crate::eviction::MAX_INTERVAL.as_secs() / 60
            )));
        }
        if self.registry.shards == 0 {
            return Err(RateKeeperError::Config(
                "registry.shards must be greater than zero".to_string(),
            ));
        }
        self.build_rule_set().map(|_| ())
    }

    /// Register every configured rule, in order.
    pub fn build_rule_set(&self) -> Result<RuleSet> {
        let mut rules = RuleSet::new();
        for rule in &self.rules {
            rules.add_rule(&rule.pattern, rule.limit, rule.duration_secs)?;
        }
        Ok(rules)
    }
}
