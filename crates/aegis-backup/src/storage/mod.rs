//! Object storage abstraction over S3, GCS, and the local filesystem.

pub mod gcs;
pub mod local;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

use aegis_core::config::StorageSettings;

use crate::error::StorageResult;

/// Metadata keys stamped on every uploaded backup object.
pub mod meta_keys {
    /// `"true"`/`"false"` encryption flag.
    pub const ENCRYPTED: &str = "backup-encrypted";
    /// ISO-8601 upload timestamp.
    pub const TIMESTAMP: &str = "backup-timestamp";
    /// Engine version that produced the object.
    pub const VERSION: &str = "backup-version";
    /// Retention tier tag.
    pub const TIER: &str = "backup-tier";
}

/// Metadata associated with a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modified timestamp.
    pub last_modified: chrono::DateTime<chrono::Utc>,
    /// Custom metadata.
    pub custom: HashMap<String, String>,
}

/// Options for uploading objects.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Content type.
    pub content_type: Option<String>,
    /// Custom metadata.
    pub metadata: HashMap<String, String>,
    /// Request server-side encryption.
    pub encryption: bool,
    /// KMS key id referenced by encrypted uploads. `None` falls back to
    /// the backend's managed key.
    pub encryption_key_id: Option<String>,
}

/// Options for listing objects.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Key prefix filter.
    pub prefix: Option<String>,
}

/// Trait for object storage implementations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Upload an object.
    async fn upload(
        &self,
        key: &str,
        data: Bytes,
        options: UploadOptions,
    ) -> StorageResult<ObjectMetadata>;

    /// Download an object.
    async fn download(&self, key: &str) -> StorageResult<Bytes>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// List objects.
    async fn list(&self, options: ListOptions) -> StorageResult<Vec<ObjectMetadata>>;
}

/// Create a storage backend from configuration.
pub async fn create_storage_backend(
    settings: &StorageSettings,
) -> StorageResult<Box<dyn StorageBackend>> {
    match settings {
        StorageSettings::S3 { .. } => Ok(Box::new(s3::S3Backend::new(settings).await?)),
        StorageSettings::Gcs { .. } => Ok(Box::new(gcs::GcsBackend::new(settings).await?)),
        StorageSettings::Local { root } => Ok(Box::new(local::LocalBackend::new(root.clone())?)),
    }
}
