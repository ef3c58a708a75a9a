//! Error types for the failover orchestrator.

use thiserror::Error;

/// Failover errors.
#[derive(Error, Debug)]
pub enum FailoverError {
    #[error("a failover is already in progress")]
    InProgress,

    #[error("orchestrator halted after an unrecoverable failover error; restart required")]
    Halted,

    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("region {0} is already active")]
    AlreadyActive(String),

    #[error("target validation failed: {0}")]
    ValidationFailed(String),

    #[error("failover {id} rolled back after {phase} failed: {reason}")]
    RolledBack {
        /// Audit event id.
        id: uuid::Uuid,
        /// Phase that failed.
        phase: String,
        /// Underlying failure.
        reason: String,
    },

    #[error("rollback failed, process state is suspect: {0}")]
    RollbackFailed(String),

    #[error("replication error: {0}")]
    Replication(#[from] aegis_replication::ReplicationError),
}

/// Result type alias for failover operations.
pub type Result<T> = std::result::Result<T, FailoverError>;
