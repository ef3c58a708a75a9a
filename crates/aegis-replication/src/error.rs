//! Error types for the replicator.

use thiserror::Error;

/// Replication errors.
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("store error: {0}")]
    Store(#[from] aegis_stores::StoreError),

    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("conflict not found: {0}")]
    ConflictNotFound(uuid::Uuid),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("replicator is already running")]
    AlreadyRunning,

    #[error("replicator is not running")]
    NotRunning,

    #[error("sync pass cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;
