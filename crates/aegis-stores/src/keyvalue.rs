//! Key-value store driver seam and Redis implementation.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;

use aegis_core::config::RedisEndpoint;

use crate::error::{StoreError, StoreResult};
use crate::types::{KeyRecord, KeyValuePayload};

/// Driver seam for the key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> StoreResult<()>;

    /// One page of a cursor-driven keyspace scan. A returned cursor of
    /// zero means the scan is complete.
    async fn scan_page(&self, cursor: u64, count: usize) -> StoreResult<(u64, Vec<String>)>;

    /// Read a key with its type, TTL, and value. `None` when the key no
    /// longer exists.
    async fn read_key(&self, key: &str) -> StoreResult<Option<KeyRecord>>;

    /// Reproduce a key in this store with type-specific operations,
    /// re-applying a positive TTL.
    async fn write_key(&self, record: &KeyRecord) -> StoreResult<()>;

    /// Unix timestamp of the last completed on-disk save.
    async fn last_save(&self) -> StoreResult<i64>;

    /// Kick off an asynchronous background save.
    async fn background_save(&self) -> StoreResult<()>;
}

/// Redis-backed key-value store.
pub struct RedisKeyValueStore {
    connection: ConnectionManager,
}

impl RedisKeyValueStore {
    /// Connect to the endpoint.
    pub async fn connect(endpoint: &RedisEndpoint) -> StoreResult<Self> {
        let client = Client::open(endpoint.url.as_str())
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { connection })
    }

    fn map_err(e: redis::RedisError) -> StoreError {
        StoreError::Query(e.to_string())
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn scan_page(&self, cursor: u64, count: usize) -> StoreResult<(u64, Vec<String>)> {
        let mut conn = self.connection.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok((next, keys))
    }

    async fn read_key(&self, key: &str) -> StoreResult<Option<KeyRecord>> {
        let mut conn = self.connection.clone();

        let key_type: String = redis::cmd("TYPE")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        let ttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        let ttl_ms = if ttl > 0 { Some(ttl) } else { None };

        let value = match key_type.as_str() {
            "none" => return Ok(None),
            "string" => {
                let v: Option<String> = redis::cmd("GET")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(Self::map_err)?;
                match v {
                    Some(v) => KeyValuePayload::Text(v),
                    None => return Ok(None),
                }
            }
            "hash" => {
                let v: Vec<(String, String)> = redis::cmd("HGETALL")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(Self::map_err)?;
                KeyValuePayload::Hash(v)
            }
            "list" => {
                let v: Vec<String> = redis::cmd("LRANGE")
                    .arg(key)
                    .arg(0)
                    .arg(-1)
                    .query_async(&mut conn)
                    .await
                    .map_err(Self::map_err)?;
                KeyValuePayload::List(v)
            }
            "set" => {
                let v: Vec<String> = redis::cmd("SMEMBERS")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(Self::map_err)?;
                KeyValuePayload::Set(v)
            }
            "zset" => {
                let v: Vec<(String, f64)> = redis::cmd("ZRANGE")
                    .arg(key)
                    .arg(0)
                    .arg(-1)
                    .arg("WITHSCORES")
                    .query_async(&mut conn)
                    .await
                    .map_err(Self::map_err)?;
                KeyValuePayload::SortedSet(v)
            }
            other => {
                return Err(StoreError::Data(format!(
                    "unsupported key type {} for {}",
                    other, key
                )))
            }
        };

        Ok(Some(KeyRecord {
            key: key.to_string(),
            ttl_ms,
            value,
        }))
    }

    async fn write_key(&self, record: &KeyRecord) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let key = record.key.as_str();

        match &record.value {
            KeyValuePayload::Text(v) => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(v)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| StoreError::Write(e.to_string()))?;
            }
            KeyValuePayload::Hash(entries) => {
                redis::cmd("DEL")
                    .arg(key)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| StoreError::Write(e.to_string()))?;
                if !entries.is_empty() {
                    let mut cmd = redis::cmd("HSET");
                    cmd.arg(key);
                    for (field, value) in entries {
                        cmd.arg(field).arg(value);
                    }
                    cmd.query_async::<_, ()>(&mut conn)
                        .await
                        .map_err(|e| StoreError::Write(e.to_string()))?;
                }
            }
            KeyValuePayload::List(items) => {
                redis::cmd("DEL")
                    .arg(key)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| StoreError::Write(e.to_string()))?;
                // Captured head-first; RPUSH in capture order preserves it.
                if !items.is_empty() {
                    let mut cmd = redis::cmd("RPUSH");
                    cmd.arg(key);
                    for item in items {
                        cmd.arg(item);
                    }
                    cmd.query_async::<_, ()>(&mut conn)
                        .await
                        .map_err(|e| StoreError::Write(e.to_string()))?;
                }
            }
            KeyValuePayload::Set(members) => {
                redis::cmd("DEL")
                    .arg(key)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| StoreError::Write(e.to_string()))?;
                if !members.is_empty() {
                    let mut cmd = redis::cmd("SADD");
                    cmd.arg(key);
                    for member in members {
                        cmd.arg(member);
                    }
                    cmd.query_async::<_, ()>(&mut conn)
                        .await
                        .map_err(|e| StoreError::Write(e.to_string()))?;
                }
            }
            KeyValuePayload::SortedSet(members) => {
                redis::cmd("DEL")
                    .arg(key)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| StoreError::Write(e.to_string()))?;
                if !members.is_empty() {
                    let mut cmd = redis::cmd("ZADD");
                    cmd.arg(key);
                    for (member, score) in members {
                        cmd.arg(*score).arg(member);
                    }
                    cmd.query_async::<_, ()>(&mut conn)
                        .await
                        .map_err(|e| StoreError::Write(e.to_string()))?;
                }
            }
        }

        if let Some(ttl_ms) = record.ttl_ms {
            if ttl_ms > 0 {
                redis::cmd("PEXPIRE")
                    .arg(key)
                    .arg(ttl_ms)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| StoreError::Write(e.to_string()))?;
            }
        }

        Ok(())
    }

    async fn last_save(&self) -> StoreResult<i64> {
        let mut conn = self.connection.clone();
        redis::cmd("LASTSAVE")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)
    }

    async fn background_save(&self) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("BGSAVE")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }
}
