use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::SyncJob;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// The category of work contending for a store's lock.
///
/// The three classes are mutually exclusive for a given store — a single
/// lock slot per store covers all of them. Synchronizing a store's data
/// and reconnecting its credentials must never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationClass {
    ManualSync,
    BackgroundSync,
    Reconnection,
}

impl OperationClass {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualSync => "manual_sync",
            Self::BackgroundSync => "background_sync",
            Self::Reconnection => "reconnection",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The mutual-exclusion record for one store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Opaque process/operation token; only the holder may release.
    pub holder_id: String,
    pub class: OperationClass,
    /// Epoch millis.
    pub acquired_at: i64,
    /// Epoch millis; past this the lock is stale and reclaimable.
    pub expires_at: i64,
}

impl LockRecord {
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Result of an atomic acquisition attempt.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Acquired,
    /// An unexpired lock already exists; here it is.
    Held(LockRecord),
}

/// Lock table backend.
///
/// `try_acquire` must be atomic: check-for-unexpired-and-insert in one
/// step. Implementations may rely on native TTL expiry (Redis) or check
/// `expires_at` on access (in-memory).
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn try_acquire(
        &self,
        store_id: &str,
        record: LockRecord,
    ) -> Result<AcquireOutcome, StorageError>;

    /// Remove the lock if `holder_id` matches. Returns whether a lock
    /// was removed; mismatches are not an error.
    async fn release(&self, store_id: &str, holder_id: &str) -> Result<bool, StorageError>;

    /// Current record for a store, expired or not. Callers filter.
    async fn get(&self, store_id: &str) -> Result<Option<LockRecord>, StorageError>;

    /// Remove any lock for a store regardless of holder (store removal).
    async fn clear(&self, store_id: &str) -> Result<(), StorageError>;
}

/// Job registry backend, keyed by store id.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn put(&self, job: &SyncJob) -> Result<(), StorageError>;

    async fn get(&self, store_id: &str) -> Result<Option<SyncJob>, StorageError>;

    async fn remove(&self, store_id: &str) -> Result<(), StorageError>;

    async fn list(&self) -> Result<Vec<SyncJob>, StorageError>;
}
