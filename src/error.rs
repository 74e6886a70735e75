//! Error types for Ratekeeper.

use thiserror::Error;

/// Main error type for Ratekeeper operations.
#[derive(Error, Debug)]
pub enum RateKeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rule that cannot be evaluated (zero or overflowing duration)
    #[error("Invalid rule for pattern '{pattern}': {reason}")]
    InvalidRule {
        pattern: String,
        reason: &'static str,
    },

    /// A sweep tick that did not run to completion
    #[error("Sweep failed: {0}")]
    SweepFailed(#[from] tokio::task::JoinError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RateKeeperError>;
