//! Shared value types exchanged with store drivers.
//!
//! Payloads cross the driver seam as opaque byte buffers plus a decoded
//! timestamp; nothing above the seam inspects store-native document types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The three store kinds the DR plane coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Document store.
    Mongodb,
    /// Time-series store.
    Influxdb,
    /// Key-value store.
    Redis,
}

impl StoreKind {
    /// All store kinds in canonical order.
    pub const ALL: [StoreKind; 3] = [StoreKind::Mongodb, StoreKind::Influxdb, StoreKind::Redis];

    /// Lowercase name used in storage keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Mongodb => "mongodb",
            StoreKind::Influxdb => "influxdb",
            StoreKind::Redis => "redis",
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One version of a document as seen by the driver seam.
///
/// `payload` is the canonical JSON encoding of the document; comparison
/// above the seam is byte-level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    /// Document id, stringified.
    pub id: String,
    /// Canonical JSON payload bytes.
    pub payload: Vec<u8>,
    /// Decoded `updatedAt`, falling back to `createdAt`, if present.
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DocumentVersion {
    /// Build a version from a JSON value, extracting the timestamp
    /// hierarchy (`updatedAt` > `createdAt` > `timestamp`).
    pub fn from_json(id: impl Into<String>, value: &serde_json::Value) -> Self {
        let updated_at = ["updatedAt", "createdAt", "timestamp"]
            .iter()
            .find_map(|field| value.get(*field))
            .and_then(decode_timestamp);
        Self {
            id: id.into(),
            payload: serde_json::to_vec(value).unwrap_or_default(),
            updated_at,
        }
    }

    /// Decode the payload back into JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Decode a JSON timestamp field: RFC 3339 string or epoch milliseconds.
pub fn decode_timestamp(value: &serde_json::Value) -> Option<chrono::DateTime<chrono::Utc>> {
    match value {
        serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis),
        serde_json::Value::Object(map) => {
            // Extended JSON `{"$date": ...}` as emitted by document dumps
            map.get("$date").and_then(decode_timestamp)
        }
        _ => None,
    }
}

/// One time-series point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Measurement name.
    pub measurement: String,
    /// Timestamp in epoch milliseconds.
    pub timestamp_ms: i64,
    /// Tag set.
    pub tags: BTreeMap<String, String>,
    /// Field set, pivoted per field name.
    pub fields: BTreeMap<String, f64>,
}

/// One key with its type-specific value and TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Key name.
    pub key: String,
    /// Remaining TTL in milliseconds, if the key expires.
    pub ttl_ms: Option<i64>,
    /// Type-specific value.
    pub value: KeyValuePayload,
}

/// Type-specific key-value payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyValuePayload {
    /// Plain string value.
    Text(String),
    /// Hash fields in insertion order.
    Hash(Vec<(String, String)>),
    /// List elements, head first.
    List(Vec<String>),
    /// Set members.
    Set(Vec<String>),
    /// Sorted-set members with scores.
    SortedSet(Vec<(String, f64)>),
}
