//! # Aegis Stores
//!
//! Driver seams for the three data stores the DR plane coordinates: a
//! document store (MongoDB), a time-series store (InfluxDB), and a
//! key-value store (Redis).
//!
//! Every store sits behind an async trait so the data plane never touches
//! a driver type directly. Production implementations live next to the
//! traits; `memory` provides in-process fakes that back the test suite and
//! the DR self-tests. `dumper` holds the dump/restore capability used by
//! the backup engine, with production implementations spawning the stores'
//! native tooling.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod document;
pub mod dumper;
pub mod error;
pub mod keyvalue;
pub mod memory;
pub mod timeseries;
pub mod types;

pub use document::{DocumentStore, MongoDocumentStore};
pub use dumper::{
    DumpArtifact, DumpContext, InfluxBackupTool, MongoDumpTool, RedisSnapshotTool, StoreDumper,
};
pub use error::{StoreError, StoreResult};
pub use keyvalue::{KeyValueStore, RedisKeyValueStore};
pub use memory::{MemoryDocumentStore, MemoryDumper, MemoryKeyValueStore, MemoryTimeSeriesStore};
pub use timeseries::{InfluxTimeSeriesStore, TimeSeriesStore};
pub use types::{DocumentVersion, KeyRecord, KeyValuePayload, SeriesPoint, StoreKind};

/// A region's three store handles bundled together.
#[derive(Clone)]
pub struct RegionStores {
    /// Document store handle.
    pub documents: std::sync::Arc<dyn DocumentStore>,
    /// Time-series store handle.
    pub series: std::sync::Arc<dyn TimeSeriesStore>,
    /// Key-value store handle.
    pub keys: std::sync::Arc<dyn KeyValueStore>,
}

impl RegionStores {
    /// Ping all three stores, returning the first failure.
    pub async fn ping_all(&self) -> StoreResult<()> {
        self.documents.ping().await?;
        self.series.ping().await?;
        self.keys.ping().await?;
        Ok(())
    }
}
