use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::job::{now_millis, SyncJob};
use super::traits::{AcquireOutcome, JobStore, LockRecord, LockStore, StorageError};

/// In-memory lock table for single-instance deployments.
///
/// Expiry is checked at acquisition time: an expired record counts as a
/// free slot, so a crashed holder cannot strand a store.
pub struct InMemoryLockStore {
    locks: DashMap<String, LockRecord>,
}

impl InMemoryLockStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(
        &self,
        store_id: &str,
        record: LockRecord,
    ) -> Result<AcquireOutcome, StorageError> {
        // The entry guard holds the shard lock, making check-and-insert atomic
        match self.locks.entry(store_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now_millis()) {
                    occupied.insert(record);
                    Ok(AcquireOutcome::Acquired)
                } else {
                    Ok(AcquireOutcome::Held(occupied.get().clone()))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(AcquireOutcome::Acquired)
            }
        }
    }

    async fn release(&self, store_id: &str, holder_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .locks
            .remove_if(store_id, |_, record| record.holder_id == holder_id)
            .is_some())
    }

    async fn get(&self, store_id: &str) -> Result<Option<LockRecord>, StorageError> {
        Ok(self.locks.get(store_id).map(|r| r.value().clone()))
    }

    async fn clear(&self, store_id: &str) -> Result<(), StorageError> {
        self.locks.remove(store_id);
        Ok(())
    }
}

/// In-memory job registry for single-instance deployments.
pub struct InMemoryJobStore {
    jobs: DashMap<String, SyncJob>,
}

impl InMemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put(&self, job: &SyncJob) -> Result<(), StorageError> {
        self.jobs.insert(job.store_id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, store_id: &str) -> Result<Option<SyncJob>, StorageError> {
        Ok(self.jobs.get(store_id).map(|r| r.value().clone()))
    }

    async fn remove(&self, store_id: &str) -> Result<(), StorageError> {
        self.jobs.remove(store_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncJob>, StorageError> {
        Ok(self.jobs.iter().map(|r| r.value().clone()).collect())
    }
}
