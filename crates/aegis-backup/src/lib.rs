//! # Aegis Backup
//!
//! The backup engine of the Aegis DR platform.
//!
//! Two operations, `full_backup` and `incremental_backup`, each produce an
//! immutable [`record::BackupRecord`]. Neither raises on partial failure;
//! per-store outcomes are encoded in the record so callers can make
//! retention decisions. Records live in the object-storage catalog under
//! `backups/catalog/`, payloads under `backups/<store>/<backupId>.gz`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod catalog;
pub mod engine;
pub mod error;
pub mod record;
pub mod retention;
pub mod storage;

pub use catalog::BackupCatalog;
pub use engine::BackupEngine;
pub use error::{BackupError, Result, StorageError, StorageResult};
pub use record::{BackupKind, BackupRecord, RetentionTier, StorageLocator, StoreBackupResult};
pub use retention::{RetentionReport, RetentionSweeper};
pub use storage::{
    create_storage_backend, ListOptions, ObjectMetadata, StorageBackend, UploadOptions,
};
