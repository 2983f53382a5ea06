//! Configuration for the sync scheduler.
//!
//! # Example
//!
//! ```
//! use storesync::SchedulerConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SchedulerConfig::default();
//! assert_eq!(config.batch_size, 3);
//!
//! // Full config
//! let config = SchedulerConfig {
//!     tick_interval_ms: 30_000,
//!     batch_size: 5,
//!     max_job_retries: 5,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

/// Configuration for the scheduler and sync executor.
///
/// All fields have sensible defaults. Durations are expressed in
/// milliseconds so tests can compress time without special clocks.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Redis connection string for the shared job/lock stores
    /// (e.g., "redis://localhost:6379"). Unset means in-memory stores.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Interval between scheduler ticks (default: 60s)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Number of due jobs dispatched concurrently per batch (default: 3)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between dispatch batches within one tick (default: 2s)
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,

    /// Lock TTL for sync runs; a crashed holder's lock is reclaimable
    /// after this long (default: 5 min)
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    /// Lock TTL for the reconnection flow (default: 2 min)
    #[serde(default = "default_reconnect_lock_ttl_ms")]
    pub reconnect_lock_ttl_ms: u64,

    /// Consecutive failed runs before a job is paused (default: 3)
    #[serde(default = "default_max_job_retries")]
    pub max_job_retries: u32,

    /// Base for the job-level failure backoff; the delay before retry
    /// `n` is `3^n × retry_base_ms` (default: 5 min)
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Sync cadence per priority
    #[serde(default = "default_sync_interval_high_ms")]
    pub sync_interval_high_ms: u64,
    #[serde(default = "default_sync_interval_medium_ms")]
    pub sync_interval_medium_ms: u64,
    #[serde(default = "default_sync_interval_low_ms")]
    pub sync_interval_low_ms: u64,

    /// Per-stage timeouts for the sync pipeline
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_index_timeout_ms")]
    pub index_timeout_ms: u64,
    #[serde(default = "default_bookkeeping_timeout_ms")]
    pub bookkeeping_timeout_ms: u64,

    /// Poll interval for `wait_for_unlock` (default: 250ms)
    #[serde(default = "default_unlock_poll_ms")]
    pub unlock_poll_ms: u64,

    /// How long `remove_store` waits for an in-flight sync to release
    /// its lock before deleting index namespaces (default: 10s)
    #[serde(default = "default_remove_unlock_wait_ms")]
    pub remove_unlock_wait_ms: u64,
}

fn default_tick_interval_ms() -> u64 { 60_000 }
fn default_batch_size() -> usize { 3 }
fn default_batch_pause_ms() -> u64 { 2_000 }
fn default_lock_ttl_ms() -> u64 { 5 * 60 * 1000 }
fn default_reconnect_lock_ttl_ms() -> u64 { 2 * 60 * 1000 }
fn default_max_job_retries() -> u32 { 3 }
fn default_retry_base_ms() -> u64 { 5 * 60 * 1000 }
fn default_sync_interval_high_ms() -> u64 { 60 * 60 * 1000 } // 1h
fn default_sync_interval_medium_ms() -> u64 { 6 * 60 * 60 * 1000 } // 6h
fn default_sync_interval_low_ms() -> u64 { 12 * 60 * 60 * 1000 } // 12h
fn default_verify_timeout_ms() -> u64 { 10_000 }
fn default_fetch_timeout_ms() -> u64 { 30_000 }
fn default_index_timeout_ms() -> u64 { 30_000 }
fn default_bookkeeping_timeout_ms() -> u64 { 5_000 }
fn default_unlock_poll_ms() -> u64 { 250 }
fn default_remove_unlock_wait_ms() -> u64 { 10_000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            tick_interval_ms: default_tick_interval_ms(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            lock_ttl_ms: default_lock_ttl_ms(),
            reconnect_lock_ttl_ms: default_reconnect_lock_ttl_ms(),
            max_job_retries: default_max_job_retries(),
            retry_base_ms: default_retry_base_ms(),
            sync_interval_high_ms: default_sync_interval_high_ms(),
            sync_interval_medium_ms: default_sync_interval_medium_ms(),
            sync_interval_low_ms: default_sync_interval_low_ms(),
            verify_timeout_ms: default_verify_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            index_timeout_ms: default_index_timeout_ms(),
            bookkeeping_timeout_ms: default_bookkeeping_timeout_ms(),
            unlock_poll_ms: default_unlock_poll_ms(),
            remove_unlock_wait_ms: default_remove_unlock_wait_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Sync interval for a priority, in milliseconds.
    #[must_use]
    pub fn interval_for(&self, priority: crate::job::SyncPriority) -> u64 {
        match priority {
            crate::job::SyncPriority::High => self.sync_interval_high_ms,
            crate::job::SyncPriority::Medium => self.sync_interval_medium_ms,
            crate::job::SyncPriority::Low => self.sync_interval_low_ms,
        }
    }

    /// Job-level backoff delay after `retry_count` consecutive failures.
    ///
    /// `3^retry_count × retry_base_ms`, saturating. Grows steeply enough
    /// to bound retry storms without a per-job retry policy object.
    #[must_use]
    pub fn failure_backoff_ms(&self, retry_count: u32) -> u64 {
        3u64.saturating_pow(retry_count)
            .saturating_mul(self.retry_base_ms)
    }

    /// Compressed intervals for tests.
    pub fn fast() -> Self {
        Self {
            tick_interval_ms: 20,
            batch_size: 3,
            batch_pause_ms: 1,
            lock_ttl_ms: 500,
            reconnect_lock_ttl_ms: 500,
            max_job_retries: 3,
            retry_base_ms: 10,
            sync_interval_high_ms: 50,
            sync_interval_medium_ms: 100,
            sync_interval_low_ms: 200,
            verify_timeout_ms: 200,
            fetch_timeout_ms: 200,
            index_timeout_ms: 200,
            bookkeeping_timeout_ms: 100,
            unlock_poll_ms: 5,
            remove_unlock_wait_ms: 100,
            redis_url: None,
        }
    }
}
