//! Error types shared across the Aegis platform.

use thiserror::Error;

/// Configuration loading and validation errors. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no region is marked primary")]
    MissingPrimary,

    #[error("{0} regions are marked primary, expected exactly one")]
    MultiplePrimaries(usize),

    #[error("replication references unknown region: {0}")]
    UnknownRegion(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Notification delivery errors. Always best-effort; never propagated
/// past the notifier.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook delivery failed: {0}")]
    Http(String),

    #[error("invalid sink configuration: {0}")]
    Invalid(String),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for notification operations.
pub type NotifyResult<T> = std::result::Result<T, NotifyError>;
