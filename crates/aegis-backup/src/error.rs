//! Error types for the backup engine.

use thiserror::Error;

/// Main error type for backup operations.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("store error: {0}")]
    Store(#[from] aegis_stores::StoreError),

    #[error("backup not found: {0}")]
    NotFound(String),

    #[error("invalid backup state: {0}")]
    InvalidState(String),

    #[error("retention error: {0}")]
    Retention(String),

    #[error("restore error: {0}")]
    Restore(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage backend specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3(String),

    #[error("GCS error: {0}")]
    Gcs(String),

    #[error("local storage error: {0}")]
    Local(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for backup operations.
pub type Result<T> = std::result::Result<T, BackupError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
