//! In-process store fakes.
//!
//! These back the test suites of every data-plane crate and the CLI's DR
//! self-tests. Each fake carries an availability switch so health and
//! failover scenarios can take a region down without network fixtures.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::document::DocumentStore;
use crate::dumper::{
    read_payload, try_read_payload, write_payload, DumpArtifact, DumpContext, DumpPayload,
    StoreDumper,
};
use crate::error::{StoreError, StoreResult};
use crate::keyvalue::KeyValueStore;
use crate::timeseries::TimeSeriesStore;
use crate::types::{DocumentVersion, KeyRecord, SeriesPoint, StoreKind};

fn unavailable(kind: StoreKind) -> StoreError {
    StoreError::Connection(format!("{} store unavailable", kind))
}

/// In-memory document store.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, DocumentVersion>>>,
    available: AtomicBool,
}

impl MemoryDocumentStore {
    /// An empty, available store.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability; unavailable stores fail every operation.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(unavailable(StoreKind::Mongodb))
        }
    }

    /// Insert a JSON document, deriving id and timestamp from the value.
    pub fn insert_json(&self, collection: &str, value: serde_json::Value) {
        let id = value
            .get("_id")
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let version = DocumentVersion::from_json(id.clone(), &value);
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id, version);
    }

    /// Read a document back as JSON.
    pub fn get_json(&self, collection: &str, id: &str) -> Option<serde_json::Value> {
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id))
            .and_then(|v| v.to_json().ok())
    }

    /// Total documents across collections.
    pub fn len(&self) -> usize {
        self.collections.read().values().map(|c| c.len()).sum()
    }

    /// True when the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn export(&self) -> BTreeMap<String, Vec<DocumentVersion>> {
        self.collections
            .read()
            .iter()
            .map(|(name, docs)| (name.clone(), docs.values().cloned().collect()))
            .collect()
    }

    fn import(&self, data: BTreeMap<String, Vec<DocumentVersion>>, replace: bool) {
        let mut collections = self.collections.write();
        if replace {
            collections.clear();
        }
        for (name, docs) in data {
            let entry = collections.entry(name).or_default();
            for doc in docs {
                entry.insert(doc.id.clone(), doc);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn collections(&self) -> StoreResult<Vec<String>> {
        self.check()?;
        Ok(self.collections.read().keys().cloned().collect())
    }

    async fn changed_since(
        &self,
        collection: &str,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> StoreResult<Vec<DocumentVersion>> {
        self.check()?;
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .values()
            .filter(|v| match (since, v.updated_at) {
                (Some(cutoff), Some(ts)) => ts > cutoff,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .cloned()
            .collect())
    }

    async fn fetch(&self, collection: &str, id: &str) -> StoreResult<Option<DocumentVersion>> {
        self.check()?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn upsert(&self, collection: &str, version: &DocumentVersion) -> StoreResult<()> {
        self.check()?;
        if version.id.is_empty() {
            return Err(StoreError::Data("document without id".to_string()));
        }
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(version.id.clone(), version.clone());
        Ok(())
    }
}

/// In-memory time-series store.
#[derive(Default)]
pub struct MemoryTimeSeriesStore {
    points: RwLock<Vec<SeriesPoint>>,
    available: AtomicBool,
}

impl MemoryTimeSeriesStore {
    /// An empty, available store.
    pub fn new() -> Self {
        Self {
            points: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(unavailable(StoreKind::Influxdb))
        }
    }

    /// All stored points, timestamp-ordered.
    pub fn all_points(&self) -> Vec<SeriesPoint> {
        let mut points = self.points.read().clone();
        points.sort_by_key(|p| p.timestamp_ms);
        points
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    /// True when the store holds no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryTimeSeriesStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn query_window(
        &self,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<Vec<SeriesPoint>> {
        self.check()?;
        let start_ms = start.map(|s| s.timestamp_millis());
        let end_ms = end.timestamp_millis();
        let mut points: Vec<SeriesPoint> = self
            .points
            .read()
            .iter()
            .filter(|p| {
                p.timestamp_ms <= end_ms && start_ms.map(|s| p.timestamp_ms > s).unwrap_or(true)
            })
            .cloned()
            .collect();
        points.sort_by_key(|p| p.timestamp_ms);
        Ok(points)
    }

    async fn write_points(&self, new_points: &[SeriesPoint]) -> StoreResult<()> {
        self.check()?;
        let mut points = self.points.write();
        for point in new_points {
            match points.iter_mut().find(|p| {
                p.measurement == point.measurement
                    && p.timestamp_ms == point.timestamp_ms
                    && p.tags == point.tags
            }) {
                Some(existing) => *existing = point.clone(),
                None => points.push(point.clone()),
            }
        }
        Ok(())
    }

    async fn flush(&self) -> StoreResult<()> {
        self.check()
    }
}

/// In-memory key-value store with a controllable background-save clock.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    records: RwLock<BTreeMap<String, KeyRecord>>,
    last_save: AtomicI64,
    save_advances: AtomicBool,
    available: AtomicBool,
}

impl MemoryKeyValueStore {
    /// An empty, available store whose background saves complete
    /// immediately.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            last_save: AtomicI64::new(1),
            save_advances: AtomicBool::new(true),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// When false, background saves never advance the last-save clock.
    pub fn set_save_advances(&self, advances: bool) {
        self.save_advances.store(advances, Ordering::Release);
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(unavailable(StoreKind::Redis))
        }
    }

    /// Insert a record directly.
    pub fn put(&self, record: KeyRecord) {
        self.records.write().insert(record.key.clone(), record);
    }

    /// Read a record directly.
    pub fn get(&self, key: &str) -> Option<KeyRecord> {
        self.records.read().get(key).cloned()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True when the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn scan_page(&self, cursor: u64, count: usize) -> StoreResult<(u64, Vec<String>)> {
        self.check()?;
        let keys: Vec<String> = self.records.read().keys().cloned().collect();
        let start = cursor as usize;
        let end = (start + count).min(keys.len());
        let page = keys[start.min(keys.len())..end].to_vec();
        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next, page))
    }

    async fn read_key(&self, key: &str) -> StoreResult<Option<KeyRecord>> {
        self.check()?;
        Ok(self.records.read().get(key).cloned())
    }

    async fn write_key(&self, record: &KeyRecord) -> StoreResult<()> {
        self.check()?;
        self.records
            .write()
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn last_save(&self) -> StoreResult<i64> {
        self.check()?;
        Ok(self.last_save.load(Ordering::Acquire))
    }

    async fn background_save(&self) -> StoreResult<()> {
        self.check()?;
        if self.save_advances.load(Ordering::Acquire) {
            self.last_save.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

/// Dumper over the in-memory fakes, producing the same envelope format
/// as the driver-based incremental dumps.
pub enum MemoryDumper {
    /// Dumper over a document fake.
    Documents(Arc<MemoryDocumentStore>),
    /// Dumper over a time-series fake.
    Series(Arc<MemoryTimeSeriesStore>),
    /// Dumper over a key-value fake.
    Keys(Arc<MemoryKeyValueStore>),
}

#[async_trait]
impl StoreDumper for MemoryDumper {
    fn kind(&self) -> StoreKind {
        match self {
            MemoryDumper::Documents(_) => StoreKind::Mongodb,
            MemoryDumper::Series(_) => StoreKind::Influxdb,
            MemoryDumper::Keys(_) => StoreKind::Redis,
        }
    }

    async fn dump_full(&self, ctx: &DumpContext, dest: &Path) -> StoreResult<DumpArtifact> {
        if ctx.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let (payload, collections) = match self {
            MemoryDumper::Documents(store) => {
                store.check()?;
                let collections = store.export();
                let names = collections.keys().cloned().collect();
                (
                    DumpPayload::Mongodb {
                        full: true,
                        collections,
                    },
                    names,
                )
            }
            MemoryDumper::Series(store) => {
                store.check()?;
                let points = store.all_points();
                let mut names: Vec<String> =
                    points.iter().map(|p| p.measurement.clone()).collect();
                names.sort();
                names.dedup();
                (DumpPayload::Influxdb { full: true, points }, names)
            }
            MemoryDumper::Keys(store) => {
                store.check()?;
                // Mirror the production path: the snapshot only exists
                // after a completed background save.
                let previous = store.last_save().await?;
                store.background_save().await?;
                if store.last_save().await? <= previous {
                    return Err(StoreError::Timeout(
                        "background save did not complete within the wait ceiling".to_string(),
                    ));
                }
                let records = store.records.read().values().cloned().collect();
                (
                    DumpPayload::Redis {
                        full: true,
                        records,
                    },
                    vec!["keyspace".to_string()],
                )
            }
        };

        let size_bytes = write_payload(dest, &payload)?;
        Ok(DumpArtifact {
            path: dest.to_path_buf(),
            size_bytes,
            collections,
        })
    }

    async fn dump_incremental(
        &self,
        ctx: &DumpContext,
        since: chrono::DateTime<chrono::Utc>,
        dest: &Path,
    ) -> StoreResult<DumpArtifact> {
        if ctx.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let (payload, collections) = match self {
            MemoryDumper::Documents(store) => {
                let mut exported = BTreeMap::new();
                for name in store.collections().await? {
                    let changed = store.changed_since(&name, Some(since)).await?;
                    if !changed.is_empty() {
                        exported.insert(name, changed);
                    }
                }
                let names = exported.keys().cloned().collect();
                (
                    DumpPayload::Mongodb {
                        full: false,
                        collections: exported,
                    },
                    names,
                )
            }
            MemoryDumper::Series(store) => {
                let points = store.query_window(Some(since), chrono::Utc::now()).await?;
                let mut names: Vec<String> =
                    points.iter().map(|p| p.measurement.clone()).collect();
                names.sort();
                names.dedup();
                (
                    DumpPayload::Influxdb {
                        full: false,
                        points,
                    },
                    names,
                )
            }
            MemoryDumper::Keys(store) => {
                store.check()?;
                let records = store.records.read().values().cloned().collect();
                (
                    DumpPayload::Redis {
                        full: false,
                        records,
                    },
                    vec!["keyspace".to_string()],
                )
            }
        };

        let size_bytes = write_payload(dest, &payload)?;
        Ok(DumpArtifact {
            path: dest.to_path_buf(),
            size_bytes,
            collections,
        })
    }

    async fn restore(&self, ctx: &DumpContext, src: &Path) -> StoreResult<()> {
        if ctx.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let payload = match try_read_payload(src)? {
            Some(payload) => payload,
            None => read_payload(src)?,
        };
        match (self, payload) {
            (MemoryDumper::Documents(store), DumpPayload::Mongodb { full, collections }) => {
                store.check()?;
                store.import(collections, full);
                Ok(())
            }
            (MemoryDumper::Series(store), DumpPayload::Influxdb { full, points }) => {
                if full {
                    store.check()?;
                    store.points.write().clear();
                }
                store.write_points(&points).await
            }
            (MemoryDumper::Keys(store), DumpPayload::Redis { full, records }) => {
                store.check()?;
                if full {
                    store.records.write().clear();
                }
                for record in records {
                    store.put(record);
                }
                Ok(())
            }
            _ => Err(StoreError::Restore(
                "artifact does not match this store".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyValuePayload;

    #[tokio::test]
    async fn test_document_changed_since() {
        let store = MemoryDocumentStore::new();
        store.insert_json(
            "users",
            serde_json::json!({"_id": "a", "v": 1, "updatedAt": "2024-01-01T00:00:00Z"}),
        );
        store.insert_json(
            "users",
            serde_json::json!({"_id": "b", "v": 2, "updatedAt": "2024-06-01T00:00:00Z"}),
        );

        let cutoff = chrono::DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let changed = store.changed_since("users", Some(cutoff)).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, "b");
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = MemoryDocumentStore::new();
        store.set_available(false);
        assert!(store.ping().await.is_err());
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_keyvalue_scan_pages() {
        let store = MemoryKeyValueStore::new();
        for i in 0..25 {
            store.put(KeyRecord {
                key: format!("key:{:02}", i),
                ttl_ms: None,
                value: KeyValuePayload::Text(i.to_string()),
            });
        }

        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let (next, keys) = store.scan_page(cursor, 10).await.unwrap();
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn test_memory_dumper_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(MemoryDocumentStore::new());
        source.insert_json("users", serde_json::json!({"_id": "1", "v": "a"}));
        source.insert_json("users", serde_json::json!({"_id": "2", "v": "b"}));

        let path = dir.path().join("docs.gz");
        let ctx = DumpContext::new();
        let artifact = MemoryDumper::Documents(Arc::clone(&source))
            .dump_full(&ctx, &path)
            .await
            .unwrap();
        assert!(artifact.size_bytes > 0);
        assert_eq!(artifact.collections, vec!["users".to_string()]);

        let target = Arc::new(MemoryDocumentStore::new());
        MemoryDumper::Documents(Arc::clone(&target))
            .restore(&ctx, &path)
            .await
            .unwrap();
        assert_eq!(target.len(), 2);
        assert_eq!(
            target.get_json("users", "1").unwrap(),
            serde_json::json!({"_id": "1", "v": "a"})
        );
    }

    #[tokio::test]
    async fn test_stalled_background_save_fails_dump() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyValueStore::new());
        store.set_save_advances(false);

        let path = dir.path().join("keys.gz");
        let result = MemoryDumper::Keys(store)
            .dump_full(&DumpContext::new(), &path)
            .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
        assert!(!path.exists());
    }
}
