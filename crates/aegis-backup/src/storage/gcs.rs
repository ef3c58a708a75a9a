//! Google Cloud Storage backend.

use async_trait::async_trait;
use bytes::Bytes;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::{
    delete::DeleteObjectRequest,
    download::Range,
    get::GetObjectRequest,
    list::ListObjectsRequest,
    upload::{Media, UploadObjectRequest, UploadType},
    Object,
};

use aegis_core::config::StorageSettings;

use super::{ListOptions, ObjectMetadata, StorageBackend, UploadOptions};
use crate::error::{StorageError, StorageResult};

/// Google Cloud Storage backend.
pub struct GcsBackend {
    client: Client,
    bucket: String,
}

impl GcsBackend {
    /// Create a new GCS backend.
    pub async fn new(settings: &StorageSettings) -> StorageResult<Self> {
        let bucket = match settings {
            StorageSettings::Gcs { bucket, .. } => bucket.clone(),
            _ => {
                return Err(StorageError::Gcs(
                    "invalid configuration for GCS".to_string(),
                ))
            }
        };

        let config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(Self::map_err)?;
        let client = Client::new(config);

        Ok(Self { client, bucket })
    }

    fn map_err<E: std::fmt::Display>(err: E) -> StorageError {
        StorageError::Gcs(err.to_string())
    }

    fn object_to_metadata(object: &Object) -> ObjectMetadata {
        ObjectMetadata {
            key: object.name.clone(),
            size: object.size.max(0) as u64,
            last_modified: object
                .updated
                .and_then(|dt| {
                    chrono::DateTime::<chrono::Utc>::from_timestamp(
                        dt.unix_timestamp(),
                        dt.nanosecond(),
                    )
                })
                .unwrap_or_else(chrono::Utc::now),
            custom: object.metadata.clone().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl StorageBackend for GcsBackend {
    async fn upload(
        &self,
        key: &str,
        data: Bytes,
        options: UploadOptions,
    ) -> StorageResult<ObjectMetadata> {
        let request = UploadObjectRequest {
            bucket: self.bucket.clone(),
            ..Default::default()
        };

        let upload_type = if options.metadata.is_empty() {
            UploadType::Simple(Media::new(key.to_string()))
        } else {
            let object = Object {
                name: key.to_string(),
                metadata: Some(options.metadata.clone()),
                ..Default::default()
            };
            UploadType::Multipart(Box::new(object))
        };

        let uploaded = self
            .client
            .upload_object(&request, data.to_vec(), &upload_type)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        Ok(Self::object_to_metadata(&uploaded))
    }

    async fn download(&self, key: &str) -> StorageResult<Bytes> {
        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            object: key.to_string(),
            ..Default::default()
        };

        let data = self
            .client
            .download_object(&request, &Range(None, None))
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let request = DeleteObjectRequest {
            bucket: self.bucket.clone(),
            object: key.to_string(),
            ..Default::default()
        };
        self.client
            .delete_object(&request)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            object: key.to_string(),
            ..Default::default()
        };
        Ok(self.client.get_object(&request).await.is_ok())
    }

    async fn list(&self, options: ListOptions) -> StorageResult<Vec<ObjectMetadata>> {
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let request = ListObjectsRequest {
                bucket: self.bucket.clone(),
                prefix: options.prefix.clone(),
                page_token: page_token.clone(),
                ..Default::default()
            };

            let response = self
                .client
                .list_objects(&request)
                .await
                .map_err(Self::map_err)?;

            for object in response.items.unwrap_or_default() {
                objects.push(Self::object_to_metadata(&object));
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(objects)
    }
}
