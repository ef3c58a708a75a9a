//! Document store driver seam and MongoDB implementation.

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::ReplaceOptions;
use mongodb::Client;

use aegis_core::config::MongoEndpoint;

use crate::error::{StoreError, StoreResult};
use crate::types::DocumentVersion;

/// Driver seam for the document store.
///
/// Payloads cross this seam as opaque canonical-JSON byte buffers; the
/// replicator and backup engine never see driver document types.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> StoreResult<()>;

    /// Non-system collection names.
    async fn collections(&self) -> StoreResult<Vec<String>>;

    /// Documents whose `updatedAt` or `createdAt` is strictly after
    /// `since`. `None` returns every document.
    async fn changed_since(
        &self,
        collection: &str,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> StoreResult<Vec<DocumentVersion>>;

    /// Fetch a single document by id.
    async fn fetch(&self, collection: &str, id: &str) -> StoreResult<Option<DocumentVersion>>;

    /// Insert or replace a document by id.
    async fn upsert(&self, collection: &str, version: &DocumentVersion) -> StoreResult<()>;
}

/// MongoDB-backed document store.
pub struct MongoDocumentStore {
    client: Client,
    database: String,
}

impl MongoDocumentStore {
    /// Connect to the endpoint.
    pub async fn connect(endpoint: &MongoEndpoint) -> StoreResult<Self> {
        let client = Client::with_uri_str(&endpoint.uri)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            database: endpoint.database.clone(),
        })
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.client.database(&self.database).collection(name)
    }

    /// Stringify a BSON `_id` for the seam.
    fn id_string(id: &Bson) -> String {
        match id {
            Bson::ObjectId(oid) => oid.to_hex(),
            Bson::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Convert a driver document into a seam version, skipping documents
    /// without an `_id`.
    fn to_version(document: Document) -> Option<DocumentVersion> {
        let id = document.get("_id").map(Self::id_string)?;
        let json = Bson::Document(document).into_relaxed_extjson();
        Some(DocumentVersion::from_json(id, &json))
    }

    /// Filter used by `fetch`/`upsert`: prefer the payload's own `_id`
    /// representation, falling back to the string id.
    fn id_filter(id: &str, payload: Option<&Document>) -> Document {
        if let Some(id_bson) = payload.and_then(|d| d.get("_id")).cloned() {
            return doc! { "_id": id_bson };
        }
        if let Ok(oid) = mongodb::bson::oid::ObjectId::parse_str(id) {
            return doc! { "_id": oid };
        }
        doc! { "_id": id }
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn ping(&self) -> StoreResult<()> {
        self.client
            .database(&self.database)
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn collections(&self) -> StoreResult<Vec<String>> {
        let names = self
            .client
            .database(&self.database)
            .list_collection_names(None)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(names
            .into_iter()
            .filter(|n| !n.starts_with("system."))
            .collect())
    }

    async fn changed_since(
        &self,
        collection: &str,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> StoreResult<Vec<DocumentVersion>> {
        let filter = match since {
            Some(ts) => {
                let cutoff = mongodb::bson::DateTime::from_chrono(ts);
                doc! {
                    "$or": [
                        { "updatedAt": { "$gt": cutoff } },
                        { "createdAt": { "$gt": cutoff } },
                    ]
                }
            }
            None => Document::new(),
        };

        let mut cursor = self
            .collection(collection)
            .find(filter, None)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut versions = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
        {
            match Self::to_version(document) {
                Some(version) => versions.push(version),
                None => {
                    tracing::warn!(collection, "skipping document without _id");
                }
            }
        }
        Ok(versions)
    }

    async fn fetch(&self, collection: &str, id: &str) -> StoreResult<Option<DocumentVersion>> {
        let document = self
            .collection(collection)
            .find_one(Self::id_filter(id, None), None)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(document.and_then(Self::to_version))
    }

    async fn upsert(&self, collection: &str, version: &DocumentVersion) -> StoreResult<()> {
        let json = version.to_json().map_err(StoreError::Serialization)?;
        let bson = Bson::try_from(json).map_err(|e| StoreError::Data(e.to_string()))?;
        let document = bson
            .as_document()
            .cloned()
            .ok_or_else(|| StoreError::Data("document payload is not an object".to_string()))?;

        let filter = Self::id_filter(&version.id, Some(&document));
        self.collection(collection)
            .replace_one(
                filter,
                document,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }
}
