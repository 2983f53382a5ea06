// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed job and lock stores for multi-instance deployments.
//!
//! Locks lean on Redis primitives rather than re-implementing expiry:
//! - `SET key value NX PX ttl` makes acquisition atomic, and the native
//!   TTL evicts stale locks from crashed holders with no sweeper.
//! - Release is a small Lua script so the holder check and DEL happen
//!   in one round trip.
//!
//! Jobs are plain JSON values under `job:{store_id}`, with a set of
//! registered store ids so `list` doesn't SCAN the keyspace.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use crate::job::{now_millis, SyncJob};
use crate::resilience::retry::{execute_with_retry, RetryPolicy};
use crate::error::SyncError;
use super::traits::{AcquireOutcome, JobStore, LockRecord, LockStore, StorageError};

const RELEASE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
  local ok, data = pcall(cjson.decode, current)
  if ok and data.holder_id == ARGV[1] then
    return redis.call('DEL', KEYS[1])
  end
end
return 0
"#;

async fn connect(connection_string: &str) -> Result<ConnectionManager, StorageError> {
    let client = Client::open(connection_string)
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    // Fast-fail on bad config instead of hanging
    execute_with_retry("redis_connect", &RetryPolicy::connect(), || {
        let client = client.clone();
        async move {
            ConnectionManager::new(client)
                .await
                .map_err(|e| SyncError::from_message(e.to_string()))
        }
    })
    .await
    .map_err(|e| StorageError::Backend(e.to_string()))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Encoding(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Encoding(e.to_string()))
}

/// Lock table backed by Redis `SET NX PX`.
pub struct RedisLockStore {
    connection: ConnectionManager,
    release_script: Script,
    /// Optional key prefix for namespacing when sharing an instance.
    prefix: String,
}

impl RedisLockStore {
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    pub async fn with_prefix(
        connection_string: &str,
        prefix: Option<&str>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            connection: connect(connection_string).await?,
            release_script: Script::new(RELEASE_SCRIPT),
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[inline]
    fn key(&self, store_id: &str) -> String {
        format!("{}lock:{}", self.prefix, store_id)
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn try_acquire(
        &self,
        store_id: &str,
        record: LockRecord,
    ) -> Result<AcquireOutcome, StorageError> {
        let key = self.key(store_id);
        let payload = encode(&record)?;
        let ttl_ms = record.expires_at.saturating_sub(now_millis()).max(1) as u64;
        let mut conn = self.connection.clone();

        // The slot can free between SET and GET (TTL expiry); a couple
        // of rounds settles it either way.
        for _ in 0..3 {
            let set: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&payload)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            if set.is_some() {
                return Ok(AcquireOutcome::Acquired);
            }

            let existing: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            if let Some(raw) = existing {
                return Ok(AcquireOutcome::Held(decode(&raw)?));
            }
        }

        Err(StorageError::Backend(format!(
            "lock slot for '{}' kept changing during acquisition",
            store_id
        )))
    }

    async fn release(&self, store_id: &str, holder_id: &str) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();
        let removed: i64 = self
            .release_script
            .key(self.key(store_id))
            .arg(holder_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn get(&self, store_id: &str) -> Result<Option<LockRecord>, StorageError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(self.key(store_id))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        raw.map(|r| decode(&r)).transpose()
    }

    async fn clear(&self, store_id: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(self.key(store_id))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// Job registry backed by Redis JSON values plus a membership set.
pub struct RedisJobStore {
    connection: ConnectionManager,
    prefix: String,
}

impl RedisJobStore {
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    pub async fn with_prefix(
        connection_string: &str,
        prefix: Option<&str>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            connection: connect(connection_string).await?,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[inline]
    fn job_key(&self, store_id: &str) -> String {
        format!("{}job:{}", self.prefix, store_id)
    }

    #[inline]
    fn members_key(&self) -> String {
        format!("{}jobs", self.prefix)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn put(&self, job: &SyncJob) -> Result<(), StorageError> {
        let payload = encode(job)?;
        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .set(self.job_key(&job.store_id), payload)
            .ignore()
            .sadd(self.members_key(), &job.store_id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, store_id: &str) -> Result<Option<SyncJob>, StorageError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(self.job_key(store_id))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        raw.map(|r| decode(&r)).transpose()
    }

    async fn remove(&self, store_id: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(self.job_key(store_id))
            .ignore()
            .srem(self.members_key(), store_id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncJob>, StorageError> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn
            .smembers(self.members_key())
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if members.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = members.iter().map(|m| self.job_key(m)).collect();
        let raws: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut jobs = Vec::with_capacity(raws.len());
        for raw in raws.into_iter().flatten() {
            jobs.push(decode(&raw)?);
        }
        Ok(jobs)
    }
}
