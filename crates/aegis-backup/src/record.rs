//! Backup records: the immutable outcome of one engine run.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use aegis_stores::StoreKind;

/// Backup kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Self-contained snapshot.
    Full,
    /// Delta since the last successful backup, composable with the most
    /// recent full.
    Incremental,
}

impl BackupKind {
    /// Lowercase name used in backup ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retention tier a backup is tagged with at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionTier {
    /// Kept per the daily count.
    Daily,
    /// Kept per the weekly count.
    Weekly,
    /// Kept per the monthly count.
    Monthly,
}

/// Generate a backup id: `<kind>-<iso-timestamp-with-colons-replaced>-<nonce>`.
pub fn generate_backup_id(kind: BackupKind, timestamp: chrono::DateTime<chrono::Utc>) -> String {
    let iso = timestamp
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        .replace(':', "-");
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("{}-{}-{}", kind, iso, nonce.to_lowercase())
}

/// Per-store outcome of one backup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreBackupResult {
    /// Which store.
    pub store: StoreKind,
    /// Uploaded archive size in bytes.
    pub size_bytes: u64,
    /// Whether dump and upload both succeeded.
    pub success: bool,
    /// Failure description, if any.
    pub error: Option<String>,
    /// Logical containers covered (collections, measurements, keyspace).
    pub collections: Vec<String>,
    /// Object key of the uploaded archive.
    pub key: Option<String>,
}

impl StoreBackupResult {
    /// A failed sub-result.
    pub fn failed(store: StoreKind, error: impl Into<String>) -> Self {
        Self {
            store,
            size_bytes: 0,
            success: false,
            error: Some(error.into()),
            collections: Vec::new(),
            key: None,
        }
    }
}

/// Where a backup's objects live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageLocator {
    /// Bucket (or local root) name.
    pub bucket: String,
    /// Key prefix common to the backup's objects.
    pub prefix: String,
}

/// Immutable record of one backup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// Backup id.
    pub id: String,
    /// Full or incremental.
    pub kind: BackupKind,
    /// When the run started.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Per-store outcomes.
    pub stores: Vec<StoreBackupResult>,
    /// Sum of uploaded archive sizes.
    pub total_size_bytes: u64,
    /// Run duration in milliseconds.
    pub duration_ms: u64,
    /// Conjunction of the per-store outcomes.
    pub success: bool,
    /// Collected failure descriptions.
    pub errors: Vec<String>,
    /// Object storage location.
    pub locator: StorageLocator,
    /// Retention tier tag.
    pub tier: RetentionTier,
    /// Whether objects were uploaded with server-side encryption.
    pub encrypted: bool,
    /// For incrementals, the id of the full backup anchoring the chain.
    pub base_id: Option<String>,
}

impl BackupRecord {
    /// Outcome for one store, if it was attempted.
    pub fn store_result(&self, store: StoreKind) -> Option<&StoreBackupResult> {
        self.stores.iter().find(|s| s.store == store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_id_format() {
        let ts = chrono::DateTime::parse_from_rfc3339("2024-06-01T12:30:45Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let id = generate_backup_id(BackupKind::Full, ts);
        assert!(id.starts_with("full-2024-06-01T12-30-45"));
        assert!(!id.contains(':'));
        let nonce = id.rsplit('-').next().unwrap();
        assert_eq!(nonce.len(), 9);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_backup_ids_unique() {
        let ts = chrono::Utc::now();
        let a = generate_backup_id(BackupKind::Incremental, ts);
        let b = generate_backup_id(BackupKind::Incremental, ts);
        assert!(a.starts_with("incremental-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_store_result_lookup() {
        let record = BackupRecord {
            id: "full-x".to_string(),
            kind: BackupKind::Full,
            timestamp: chrono::Utc::now(),
            stores: vec![StoreBackupResult::failed(StoreKind::Redis, "down")],
            total_size_bytes: 0,
            duration_ms: 0,
            success: false,
            errors: vec!["down".to_string()],
            locator: StorageLocator {
                bucket: "dr".to_string(),
                prefix: "backups".to_string(),
            },
            tier: RetentionTier::Daily,
            encrypted: false,
            base_id: None,
        };
        assert!(record.store_result(StoreKind::Redis).is_some());
        assert!(record.store_result(StoreKind::Mongodb).is_none());
    }
}
