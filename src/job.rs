//! Sync job data structures.
//!
//! A [`SyncJob`] is the scheduler's unit of bookkeeping: one per connected
//! store, carrying the store's priority, retry budget and next due time.
//! Jobs round-trip through the [`JobStore`](crate::storage::traits::JobStore)
//! as JSON, so everything here is serde-serializable.

use serde::{Deserialize, Serialize};

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

const HOUR_MS: i64 = 60 * 60 * 1000;

/// How urgently a store needs to be re-synchronized.
///
/// Priority is derived from staleness, not configured by the user:
/// a store that has never synced (or not in >24h) is `High`, >12h is
/// `Medium`, anything fresher is `Low`. It is recomputed after every
/// completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyncPriority {
    High,
    Medium,
    Low,
}

impl SyncPriority {
    /// Derive priority from the time a store last completed a sync.
    #[must_use]
    pub fn from_staleness(last_synced_at: Option<i64>, now: i64) -> Self {
        match last_synced_at {
            None => Self::High,
            Some(at) => {
                let elapsed = now.saturating_sub(at);
                if elapsed > 24 * HOUR_MS {
                    Self::High
                } else if elapsed > 12 * HOUR_MS {
                    Self::Medium
                } else {
                    Self::Low
                }
            }
        }
    }

    /// Ordering rank for dispatch (lower dispatches first).
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl std::fmt::Display for SyncPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Lifecycle state of a sync job.
///
/// `Running` is informational only — mutual exclusion is enforced by the
/// [`LockManager`](crate::lock::LockManager), never by job status. A job
/// left `Running` by a crashed process is rescheduled once its lock
/// expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for its `next_run_at` to come due.
    Pending,
    /// Currently being synchronized (lock held).
    Running,
    /// Last run succeeded.
    Completed,
    /// Last run failed; a retry is scheduled.
    Failed,
    /// Retry budget exhausted (or validation failure); excluded from
    /// scheduling until explicitly resumed.
    Paused,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Registration input for a connected store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRecord {
    pub store_id: String,
    pub active: bool,
    /// Epoch millis of the last completed sync, if any.
    pub last_synced_at: Option<i64>,
}

/// One scheduled synchronization job, keyed by store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub store_id: String,
    pub priority: SyncPriority,
    pub status: JobStatus,
    pub retry_count: u32,
    /// Epoch millis at which the job next comes due.
    pub next_run_at: i64,
    /// Epoch millis of the last run start, if any.
    pub last_run_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
}

impl SyncJob {
    /// Create a pending job for a newly registered store.
    #[must_use]
    pub fn new(store_id: String, priority: SyncPriority, next_run_at: i64) -> Self {
        Self {
            store_id,
            priority,
            status: JobStatus::Pending,
            retry_count: 0,
            next_run_at,
            last_run_at: None,
            last_error: None,
            created_at: now_millis(),
        }
    }

    /// Whether the job is due for a scheduled run at `now`.
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.status == JobStatus::Pending && self.next_run_at <= now
    }
}
