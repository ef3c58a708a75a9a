//! Local filesystem storage backend, for development and tests.
//!
//! Objects live at `<root>/<key>`; custom metadata lives in a JSON
//! sidecar at `<root>/<key>.meta`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{ListOptions, ObjectMetadata, StorageBackend, UploadOptions};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    uploaded_at: chrono::DateTime<chrono::Utc>,
    custom: HashMap<String, String>,
}

/// Filesystem-backed storage.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    pub fn new(root: PathBuf) -> StorageResult<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.split('/').any(|part| part == "..") {
            return Err(StorageError::Local(format!("invalid key: {}", key)));
        }
        Ok(self.root.join(key))
    }

    fn sidecar_path(&self, key: &str) -> StorageResult<PathBuf> {
        Ok(self.object_path(key)?.with_extension("meta"))
    }

    fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::walk(&path, out)?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn upload(
        &self,
        key: &str,
        data: Bytes,
        options: UploadOptions,
    ) -> StorageResult<ObjectMetadata> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;

        let sidecar = Sidecar {
            uploaded_at: chrono::Utc::now(),
            custom: options.metadata.clone(),
        };
        let sidecar_json = serde_json::to_vec(&sidecar)
            .map_err(|e| StorageError::Local(e.to_string()))?;
        tokio::fs::write(self.sidecar_path(key)?, sidecar_json).await?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size: data.len() as u64,
            last_modified: sidecar.uploaded_at,
            custom: options.metadata,
        })
    }

    async fn download(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::DownloadFailed(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Local(e.to_string())),
        }
        let _ = tokio::fs::remove_file(self.sidecar_path(key)?).await;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(tokio::fs::try_exists(self.object_path(key)?).await?)
    }

    async fn list(&self, options: ListOptions) -> StorageResult<Vec<ObjectMetadata>> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            LocalBackend::walk(&root, &mut out)?;
            Ok::<_, std::io::Error>(out)
        })
        .await
        .map_err(|e| StorageError::Local(e.to_string()))??;

        let mut objects = Vec::new();
        for path in files {
            if path.extension().map(|e| e == "meta").unwrap_or(false) {
                continue;
            }
            let key = path
                .strip_prefix(&self.root)
                .map_err(|e| StorageError::Local(e.to_string()))?
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");

            if let Some(prefix) = &options.prefix {
                if !key.starts_with(prefix.as_str()) {
                    continue;
                }
            }

            let size = std::fs::metadata(&path)?.len();
            let sidecar: Option<Sidecar> = std::fs::read(self.sidecar_path(&key)?)
                .ok()
                .and_then(|raw| serde_json::from_slice(&raw).ok());

            objects.push(ObjectMetadata {
                key,
                size,
                last_modified: sidecar
                    .as_ref()
                    .map(|s| s.uploaded_at)
                    .unwrap_or_else(chrono::Utc::now),
                custom: sidecar.map(|s| s.custom).unwrap_or_default(),
            });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}
