// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-store mutual exclusion with TTL-based stale-lock reclamation.
//!
//! The [`LockManager`] is the only path to the lock table. One slot per
//! store covers all three operation classes — scheduled sync, manual
//! sync and reconnection are mutually exclusive for a store, never
//! independently lockable. Every lock carries a TTL so a crashed holder
//! cannot strand a store: an expired slot counts as free at the next
//! acquisition.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::job::now_millis;
use crate::storage::traits::{AcquireOutcome, LockRecord, LockStore, OperationClass};

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    /// Poll cadence for `wait_for_unlock`.
    poll_interval: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Acquire the store's lock for `holder_id` under `class`.
    ///
    /// Fails with [`SyncError::LockBusy`] if an unexpired lock exists
    /// under *any* class. Callers must treat that as "busy", not as a
    /// failure — the contract is strict fail-fast, never a bypass.
    pub async fn acquire(
        &self,
        store_id: &str,
        class: OperationClass,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<(), SyncError> {
        let now = now_millis();
        let record = LockRecord {
            holder_id: holder_id.to_string(),
            class,
            acquired_at: now,
            expires_at: now + ttl.as_millis() as i64,
        };

        let outcome = self
            .store
            .try_acquire(store_id, record)
            .await
            .map_err(|e| SyncError::from_message(e.to_string()))?;

        match outcome {
            AcquireOutcome::Acquired => {
                debug!(store_id, %class, holder_id, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
                crate::metrics::record_lock_event(class.as_str(), "acquired");
                Ok(())
            }
            AcquireOutcome::Held(existing) => {
                info!(
                    store_id,
                    requested = %class,
                    held_by = %existing.class,
                    holder = %existing.holder_id,
                    "Lock busy"
                );
                crate::metrics::record_lock_event(class.as_str(), "conflict");
                Err(SyncError::LockBusy(format!(
                    "store '{}' is locked for {}",
                    store_id, existing.class
                )))
            }
        }
    }

    /// Release the store's lock if `holder_id` still owns it.
    ///
    /// Idempotent: releasing an already-released or mismatched lock is
    /// a logged no-op, never an error, so cleanup paths can call this
    /// unconditionally.
    pub async fn release(&self, store_id: &str, holder_id: &str) {
        match self.store.release(store_id, holder_id).await {
            Ok(true) => {
                debug!(store_id, holder_id, "Lock released");
                crate::metrics::record_lock_event("any", "released");
            }
            Ok(false) => {
                debug!(store_id, holder_id, "Release was a no-op (absent or mismatched holder)");
            }
            Err(e) => {
                // Persistent-store hiccup: the TTL will reclaim the slot
                warn!(store_id, holder_id, error = %e, "Lock release failed");
            }
        }
    }

    /// The store's current unexpired lock, if any.
    pub async fn current(&self, store_id: &str) -> Result<Option<LockRecord>, SyncError> {
        let record = self
            .store
            .get(store_id)
            .await
            .map_err(|e| SyncError::from_message(e.to_string()))?;
        Ok(record.filter(|r| !r.is_expired(now_millis())))
    }

    /// Poll until the store is unlocked or `timeout` passes.
    ///
    /// Returns `true` once unlocked, `false` on timeout. A timeout means
    /// "proceed with caution" — it is not a guarantee of exclusivity.
    pub async fn wait_for_unlock(&self, store_id: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.current(store_id).await {
                Ok(None) => return true,
                Ok(Some(record)) => {
                    debug!(store_id, held_by = %record.class, "Waiting for unlock");
                }
                Err(e) => {
                    warn!(store_id, error = %e, "Lock probe failed while waiting");
                }
            }

            if tokio::time::Instant::now() + self.poll_interval > deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Drop any lock for the store regardless of holder. Only used when
    /// the store itself is being removed.
    pub async fn clear(&self, store_id: &str) {
        if let Err(e) = self.store.clear(store_id).await {
            warn!(store_id, error = %e, "Failed to clear lock");
        }
    }
}
