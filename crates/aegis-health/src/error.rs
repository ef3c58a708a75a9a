//! Error types for the health monitor.

use thiserror::Error;

/// Health monitoring errors.
#[derive(Error, Debug)]
pub enum HealthError {
    #[error("probe failed: {0}")]
    Probe(String),

    #[error("monitor is already running")]
    AlreadyRunning,

    #[error("monitor is not running")]
    NotRunning,
}

/// Result type alias for health operations.
pub type Result<T> = std::result::Result<T, HealthError>;
