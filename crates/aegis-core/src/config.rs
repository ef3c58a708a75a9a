//! Configuration model and load-time validation.
//!
//! The configuration file is a single JSON document with two top-level keys:
//! `disasterRecovery` (backup, replication cadence, recovery objectives,
//! notification sinks) and `replication` (the region topology and conflict
//! resolution policy). All validation happens at load time; a configuration
//! that loads is safe to hand to every component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, CoreResult};

/// Top-level Aegis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AegisConfig {
    /// Backup, recovery, and notification settings.
    pub disaster_recovery: DisasterRecoverySettings,
    /// Region topology and conflict policy.
    pub replication: ReplicationTopology,
}

/// The `disasterRecovery` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisasterRecoverySettings {
    /// Backup engine settings.
    pub backup: BackupSettings,
    /// Continuous replication settings.
    pub replication: ReplicationSettings,
    /// Recovery objectives and failover policy.
    pub recovery: RecoverySettings,
    /// Notification sinks.
    #[serde(default)]
    pub notifications: NotificationSettings,
}

/// Backup engine settings: store endpoints, object storage, retention,
/// and encryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSettings {
    /// Connection descriptors for the three data stores in the primary region.
    pub databases: StoreEndpoints,
    /// Object storage backend.
    pub storage: StorageSettings,
    /// Retention tier counts.
    pub retention: RetentionSettings,
    /// Server-side encryption settings.
    #[serde(default)]
    pub encryption: EncryptionSettings,
}

/// Object storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum StorageSettings {
    /// AWS S3 or an S3-compatible endpoint.
    #[serde(rename_all = "camelCase")]
    S3 {
        /// AWS region.
        region: String,
        /// Bucket name.
        bucket: String,
        /// Custom endpoint URL for S3-compatible stores.
        endpoint: Option<String>,
    },
    /// Google Cloud Storage.
    #[serde(rename_all = "camelCase")]
    Gcs {
        /// GCP project id.
        project_id: String,
        /// Bucket name.
        bucket: String,
    },
    /// Local filesystem, for development and tests.
    #[serde(rename_all = "camelCase")]
    Local {
        /// Root directory acting as the bucket.
        root: PathBuf,
    },
}

impl StorageSettings {
    /// The logical bucket name for this backend.
    pub fn bucket_name(&self) -> String {
        match self {
            StorageSettings::S3 { bucket, .. } => bucket.clone(),
            StorageSettings::Gcs { bucket, .. } => bucket.clone(),
            StorageSettings::Local { root } => root.display().to_string(),
        }
    }
}

/// Retention tier counts. A count of zero keeps nothing in that tier,
/// except the most recent full backup which is never deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSettings {
    /// Number of daily backups to keep.
    pub daily: u32,
    /// Number of weekly backups to keep.
    pub weekly: u32,
    /// Number of monthly backups to keep.
    pub monthly: u32,
}

/// Server-side encryption settings for uploaded objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionSettings {
    /// Whether uploads request server-side encryption.
    #[serde(default)]
    pub enabled: bool,
    /// KMS key id referenced by encrypted uploads.
    #[serde(default)]
    pub key_id: Option<String>,
}

/// Continuous replication cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSettings {
    /// Master switch for the replicator.
    pub enabled: bool,
    /// Names of the secondary regions to replicate into, in priority order.
    pub regions: Vec<String>,
    /// Seconds between sync passes per region.
    pub sync_interval: u64,
}

/// Recovery objectives and failover policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySettings {
    /// Recovery time objective, in minutes.
    pub rto: u64,
    /// Recovery point objective, in minutes.
    pub rpo: u64,
    /// Whether sustained primary unhealthiness triggers automatic failover.
    pub auto_failover: bool,
    /// Seconds between health probe rounds.
    pub health_check_interval: u64,
}

/// Notification sink configuration. All sinks are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    /// Generic webhook URL receiving JSON payloads.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Email recipients for operator alerts.
    #[serde(default)]
    pub email_recipients: Option<Vec<String>>,
    /// Slack channel (webhook-backed) for operator alerts.
    #[serde(default)]
    pub slack_channel: Option<String>,
}

impl NotificationSettings {
    /// True when at least one sink is configured.
    pub fn any_configured(&self) -> bool {
        self.webhook_url.is_some()
            || self.slack_channel.is_some()
            || self
                .email_recipients
                .as_ref()
                .map(|r| !r.is_empty())
                .unwrap_or(false)
    }
}

/// The `replication` section: region topology and conflict policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationTopology {
    /// All known regions. Exactly one must be primary.
    pub regions: Vec<RegionConfig>,
    /// How replication conflicts are resolved.
    pub conflict_resolution: ConflictResolution,
}

/// A named geographic region with its store endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfig {
    /// Region name, unique within the topology.
    pub name: String,
    /// Whether this region currently accepts writes.
    pub primary: bool,
    /// Connection descriptors for the region's stores.
    pub databases: StoreEndpoints,
    /// Advisory network parameters.
    #[serde(default)]
    pub network: NetworkProfile,
}

/// Advisory network parameters for a region link.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    /// Expected round-trip latency in milliseconds.
    #[serde(default)]
    pub latency: u64,
    /// Expected bandwidth in Mbit/s.
    #[serde(default)]
    pub bandwidth: u64,
}

/// Connection descriptors for the three data stores of a region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEndpoints {
    /// Document store.
    pub mongodb: MongoEndpoint,
    /// Time-series store.
    pub influxdb: InfluxEndpoint,
    /// Key-value store.
    pub redis: RedisEndpoint,
}

/// Document store connection descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoEndpoint {
    /// Connection URI.
    pub uri: String,
    /// Database name.
    pub database: String,
}

/// Time-series store connection descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfluxEndpoint {
    /// Base URL.
    pub url: String,
    /// Database (bucket) name.
    pub database: String,
    /// Optional username.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,
}

/// Key-value store connection descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisEndpoint {
    /// Connection URL.
    pub url: String,
    /// On-disk snapshot location, for backup streaming.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

/// Conflict resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Larger timestamp wins; ties go to the source.
    #[serde(rename = "last-write-wins")]
    LastWriteWins,
    /// Same as last-write-wins but walks a dedicated timestamp field
    /// hierarchy (`updatedAt` > `createdAt` > `timestamp` > epoch 0).
    #[serde(rename = "timestamp-based")]
    TimestampBased,
    /// Conflicts are recorded for operator resolution; the target is left
    /// untouched.
    #[serde(rename = "manual")]
    Manual,
}

impl AegisConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate a configuration document.
    pub fn from_json(raw: &str) -> CoreResult<Self> {
        let config: AegisConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate topology and cadence invariants.
    pub fn validate(&self) -> CoreResult<()> {
        let primaries = self
            .replication
            .regions
            .iter()
            .filter(|r| r.primary)
            .count();
        match primaries {
            0 => return Err(ConfigError::MissingPrimary),
            1 => {}
            n => return Err(ConfigError::MultiplePrimaries(n)),
        }

        for name in &self.disaster_recovery.replication.regions {
            if self.region(name).is_none() {
                return Err(ConfigError::UnknownRegion(name.clone()));
            }
        }

        if self.disaster_recovery.replication.sync_interval == 0 {
            return Err(ConfigError::Invalid(
                "replication.syncInterval must be positive".to_string(),
            ));
        }
        if self.disaster_recovery.recovery.health_check_interval == 0 {
            return Err(ConfigError::Invalid(
                "recovery.healthCheckInterval must be positive".to_string(),
            ));
        }
        if self.disaster_recovery.recovery.rto == 0 || self.disaster_recovery.recovery.rpo == 0 {
            return Err(ConfigError::Invalid(
                "recovery.rto and recovery.rpo must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// The single primary region.
    pub fn primary_region(&self) -> &RegionConfig {
        // validate() guarantees exactly one primary
        self.replication
            .regions
            .iter()
            .find(|r| r.primary)
            .unwrap_or(&self.replication.regions[0])
    }

    /// Secondary regions in configured replication priority order.
    pub fn secondary_regions(&self) -> Vec<&RegionConfig> {
        self.disaster_recovery
            .replication
            .regions
            .iter()
            .filter_map(|name| self.region(name))
            .filter(|r| !r.primary)
            .collect()
    }

    /// Look up a region by name.
    pub fn region(&self, name: &str) -> Option<&RegionConfig> {
        self.replication.regions.iter().find(|r| r.name == name)
    }
}
