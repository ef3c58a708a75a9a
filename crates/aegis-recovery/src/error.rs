//! Error types for recovery planning and execution.

use thiserror::Error;

/// Recovery errors.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("backup error: {0}")]
    Backup(#[from] aegis_backup::BackupError),

    #[error("no coverage: {0}")]
    NoCoverage(String),

    #[error("no usable backup found")]
    NoBackup,

    #[error("plan is not a DAG: {0}")]
    InvalidPlan(String),

    #[error("step {step} failed: {reason}")]
    StepFailed {
        /// Name of the failing step.
        step: String,
        /// Failure description.
        reason: String,
    },

    #[error("execution cancelled")]
    Cancelled,

    #[error("environment error: {0}")]
    Environment(String),
}

/// Result type alias for recovery operations.
pub type Result<T> = std::result::Result<T, RecoveryError>;
