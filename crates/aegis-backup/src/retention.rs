//! Retention sweep over the backup catalog.
//!
//! Three tiers with independent counts. Within each tier the newest
//! backups are kept up to the configured count and older ones are
//! deleted. The most recent full backup is never deleted, even when its
//! tier count is zero. Incrementals whose anchoring full was deleted are
//! deleted with it.

use std::collections::HashMap;
use std::sync::Arc;

use aegis_core::config::RetentionSettings;

use crate::catalog::BackupCatalog;
use crate::error::Result;
use crate::record::{BackupKind, BackupRecord, RetentionTier};
use crate::storage::StorageBackend;

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Default)]
pub struct RetentionReport {
    /// Records examined.
    pub examined: usize,
    /// Records kept.
    pub kept: usize,
    /// Backup ids deleted.
    pub deleted: Vec<String>,
    /// Non-fatal errors encountered while deleting.
    pub errors: Vec<String>,
}

/// Retention sweeper over a catalog and its object storage.
pub struct RetentionSweeper {
    storage: Arc<dyn StorageBackend>,
    catalog: BackupCatalog,
    settings: RetentionSettings,
}

impl RetentionSweeper {
    /// Create a sweeper.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        catalog: BackupCatalog,
        settings: RetentionSettings,
    ) -> Self {
        Self {
            storage,
            catalog,
            settings,
        }
    }

    fn tier_count(&self, tier: RetentionTier) -> usize {
        match tier {
            RetentionTier::Daily => self.settings.daily as usize,
            RetentionTier::Weekly => self.settings.weekly as usize,
            RetentionTier::Monthly => self.settings.monthly as usize,
        }
    }

    /// Run one sweep. Deletion failures are reported, not raised.
    pub async fn sweep(&self) -> Result<RetentionReport> {
        let records = self.catalog.list().await?;
        let mut report = RetentionReport {
            examined: records.len(),
            ..Default::default()
        };

        let protected_full: Option<String> = records
            .iter()
            .filter(|r| r.kind == BackupKind::Full)
            .max_by_key(|r| r.timestamp)
            .map(|r| r.id.clone());

        let mut by_tier: HashMap<RetentionTier, Vec<&BackupRecord>> = HashMap::new();
        for record in &records {
            by_tier.entry(record.tier).or_default().push(record);
        }

        let mut doomed: Vec<&BackupRecord> = Vec::new();
        for (tier, mut tier_records) in by_tier {
            tier_records.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
            let keep = self.tier_count(tier);
            for record in tier_records.into_iter().skip(keep) {
                if Some(&record.id) == protected_full.as_ref() {
                    continue;
                }
                doomed.push(record);
            }
        }

        // Incrementals anchored on a doomed full go with it.
        let doomed_fulls: Vec<String> = doomed
            .iter()
            .filter(|r| r.kind == BackupKind::Full)
            .map(|r| r.id.clone())
            .collect();
        for record in &records {
            if record.kind == BackupKind::Incremental
                && record
                    .base_id
                    .as_ref()
                    .map(|base| doomed_fulls.contains(base))
                    .unwrap_or(false)
                && !doomed.iter().any(|d| d.id == record.id)
            {
                doomed.push(record);
            }
        }

        for record in doomed {
            match self.delete_backup(record).await {
                Ok(()) => report.deleted.push(record.id.clone()),
                Err(e) => report
                    .errors
                    .push(format!("failed to delete {}: {}", record.id, e)),
            }
        }

        report.kept = report.examined - report.deleted.len();
        Ok(report)
    }

    async fn delete_backup(&self, record: &BackupRecord) -> Result<()> {
        for store_result in &record.stores {
            if let Some(key) = &store_result.key {
                if let Err(e) = self.storage.delete(key).await {
                    tracing::warn!(key = %key, error = %e, "failed to delete backup object");
                }
            }
        }
        self.catalog.delete(&record.id).await
    }
}
