//! Backup catalog: records persisted in object storage.
//!
//! Records live under `backups/catalog/<backupId>.json` so the recovery
//! planner and the retention sweep can enumerate backups without a
//! database.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::{BackupError, Result};
use crate::record::{BackupKind, BackupRecord};
use crate::storage::{ListOptions, StorageBackend, UploadOptions};

/// Key prefix for catalog records.
pub const CATALOG_PREFIX: &str = "backups/catalog/";

/// Catalog of backup records in object storage.
#[derive(Clone)]
pub struct BackupCatalog {
    storage: Arc<dyn StorageBackend>,
}

impl BackupCatalog {
    /// Create a catalog over the given backend.
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    fn record_key(id: &str) -> String {
        format!("{}{}.json", CATALOG_PREFIX, id)
    }

    /// Persist a record.
    pub async fn store(&self, record: &BackupRecord) -> Result<()> {
        let data = serde_json::to_vec(record)?;
        self.storage
            .upload(
                &Self::record_key(&record.id),
                Bytes::from(data),
                UploadOptions {
                    content_type: Some("application/json".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Load one record by id.
    pub async fn load(&self, id: &str) -> Result<BackupRecord> {
        let data = self
            .storage
            .download(&Self::record_key(id))
            .await
            .map_err(|_| BackupError::NotFound(id.to_string()))?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Delete one record by id.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.storage.delete(&Self::record_key(id)).await?;
        Ok(())
    }

    /// All records, oldest first. Unparseable entries are skipped.
    pub async fn list(&self) -> Result<Vec<BackupRecord>> {
        let objects = self
            .storage
            .list(ListOptions {
                prefix: Some(CATALOG_PREFIX.to_string()),
            })
            .await?;

        let mut records = Vec::new();
        for object in objects {
            let data = match self.storage.download(&object.key).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(key = %object.key, error = %e, "failed to read catalog entry");
                    continue;
                }
            };
            match serde_json::from_slice::<BackupRecord>(&data) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(key = %object.key, error = %e, "skipping malformed catalog entry");
                }
            }
        }
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    /// The most recent fully successful full backup.
    pub async fn latest_successful_full(&self) -> Result<Option<BackupRecord>> {
        let records = self.list().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.kind == BackupKind::Full && r.success)
            .max_by_key(|r| r.timestamp))
    }

    /// The most recent full backup regardless of outcome.
    pub async fn latest_full(&self) -> Result<Option<BackupRecord>> {
        let records = self.list().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.kind == BackupKind::Full)
            .max_by_key(|r| r.timestamp))
    }

    /// Select the restore chain for a point in time: the newest successful
    /// full backup at or before `target`, then every successful incremental
    /// in `(full.timestamp, target]`, ordered by timestamp.
    pub async fn chain_for_point_in_time(
        &self,
        target: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<(BackupRecord, Vec<BackupRecord>)>> {
        let records = self.list().await?;

        let Some(full) = records
            .iter()
            .filter(|r| r.kind == BackupKind::Full && r.success && r.timestamp <= target)
            .max_by_key(|r| r.timestamp)
            .cloned()
        else {
            return Ok(None);
        };

        let mut incrementals: Vec<BackupRecord> = records
            .into_iter()
            .filter(|r| {
                r.kind == BackupKind::Incremental
                    && r.success
                    && r.timestamp > full.timestamp
                    && r.timestamp <= target
            })
            .collect();
        incrementals.sort_by_key(|r| r.timestamp);

        Ok(Some((full, incrementals)))
    }
}
