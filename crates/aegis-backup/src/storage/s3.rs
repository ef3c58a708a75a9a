//! AWS S3 storage backend.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::Region, primitives::ByteStream, types::ServerSideEncryption, Client,
};
use bytes::Bytes;
use std::collections::HashMap;

use aegis_core::config::StorageSettings;

use super::{ListOptions, ObjectMetadata, StorageBackend, UploadOptions};
use crate::error::{StorageError, StorageResult};

/// AWS S3 storage backend.
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    /// Create a new S3 backend.
    pub async fn new(settings: &StorageSettings) -> StorageResult<Self> {
        let (region, bucket, endpoint) = match settings {
            StorageSettings::S3 {
                region,
                bucket,
                endpoint,
            } => (region.clone(), bucket.clone(), endpoint.clone()),
            _ => {
                return Err(StorageError::S3(
                    "invalid configuration for S3".to_string(),
                ))
            }
        };

        let mut loader = aws_config::from_env().region(Region::new(region));
        if let Some(endpoint_url) = endpoint {
            loader = loader.endpoint_url(endpoint_url);
        }
        let aws_config = loader.load().await;
        let client = Client::new(&aws_config);

        Ok(Self { client, bucket })
    }

    fn map_err<E: std::fmt::Display>(err: E) -> StorageError {
        StorageError::S3(err.to_string())
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn upload(
        &self,
        key: &str,
        data: Bytes,
        options: UploadOptions,
    ) -> StorageResult<ObjectMetadata> {
        let size = data.len() as u64;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data));

        if let Some(content_type) = &options.content_type {
            request = request.content_type(content_type);
        }
        for (k, v) in &options.metadata {
            request = request.metadata(k, v);
        }
        if options.encryption {
            request = request.server_side_encryption(ServerSideEncryption::AwsKms);
            if let Some(key_id) = &options.encryption_key_id {
                request = request.ssekms_key_id(key_id);
            }
        }

        request.send().await.map_err(Self::map_err)?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size,
            last_modified: chrono::Utc::now(),
            custom: options.metadata,
        })
    }

    async fn download(&self, key: &str) -> StorageResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(Self::map_err)?
            .into_bytes();
        Ok(data)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn list(&self, options: ListOptions) -> StorageResult<Vec<ObjectMetadata>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(prefix) = &options.prefix {
                request = request.prefix(prefix);
            }
            if let Some(continuation) = &token {
                request = request.continuation_token(continuation);
            }

            let output = request.send().await.map_err(Self::map_err)?;
            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                objects.push(ObjectMetadata {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|t| {
                            chrono::DateTime::<chrono::Utc>::from_timestamp(t.secs(), 0)
                        })
                        .unwrap_or_else(chrono::Utc::now),
                    custom: HashMap::new(),
                });
            }

            if output.is_truncated().unwrap_or(false) {
                token = output.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(objects)
    }
}
