// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The sync scheduler: decides *when* each store synchronizes and
//! serializes all access through the lock manager.
//!
//! Every trigger — periodic tick, manual request, reconnection flow —
//! converges on the same path: look up the job, acquire the store's
//! lock under the trigger's operation class, run the executor, update
//! job state, release the lock unconditionally. Lock conflicts fail
//! fast with a structured "busy" outcome; there is no bypass.
//!
//! The scheduler is owned and started by the embedding process:
//! construct it with injected stores and collaborators, spawn
//! [`run`](Scheduler::run), and flip the shutdown channel to stop it.
//!
//! # Example
//!
//! ```rust,ignore
//! let scheduler = Scheduler::new(
//!     config, jobs, lock_store, executor, notifier, credentials, index,
//! );
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(scheduler.clone().run(shutdown_rx));
//!
//! scheduler.register_store(&store).await?;
//! let outcome = scheduler.trigger_immediate("store-1").await;
//!
//! shutdown_tx.send(true).ok();
//! handle.await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::connectors::{namespace_for, CredentialProvider, EntityType, IndexSink, ReconnectNotifier};
use crate::error::{ErrorClass, SyncError};
use crate::executor::SyncExecutor;
use crate::job::{now_millis, JobStatus, StoreRecord, SyncJob, SyncPriority};
use crate::lock::LockManager;
use crate::storage::traits::{JobStore, LockStore, OperationClass};

/// Structured result of a triggered operation. The manual-trigger
/// surface always returns one of these — it never throws past its
/// boundary.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub success: bool,
    pub error: Option<String>,
    /// Documents indexed per entity type, on success.
    pub synced_counts: Option<BTreeMap<String, usize>>,
}

impl TriggerOutcome {
    fn ok(synced_counts: BTreeMap<String, usize>) -> Self {
        Self {
            success: true,
            error: None,
            synced_counts: Some(synced_counts),
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            synced_counts: None,
        }
    }
}

/// Selection numbers for one tick, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Jobs whose `next_run_at` had passed.
    pub due: usize,
    /// Due jobs skipped because their store holds an active lock.
    pub skipped_locked: usize,
    /// Jobs actually dispatched this tick.
    pub dispatched: usize,
}

/// Owns the job registry and drives synchronization.
///
/// Cheap to clone — all state lives behind shared handles — so the tick
/// loop can hand each dispatched job its own copy as an isolation
/// boundary.
#[derive(Clone)]
pub struct Scheduler {
    config: Arc<SchedulerConfig>,
    jobs: Arc<dyn JobStore>,
    locks: LockManager,
    executor: Arc<SyncExecutor>,
    notifier: Arc<dyn ReconnectNotifier>,
    credentials: Arc<dyn CredentialProvider>,
    index: Arc<dyn IndexSink>,
}

impl Scheduler {
    pub fn new(
        config: Arc<SchedulerConfig>,
        jobs: Arc<dyn JobStore>,
        lock_store: Arc<dyn LockStore>,
        executor: Arc<SyncExecutor>,
        notifier: Arc<dyn ReconnectNotifier>,
        credentials: Arc<dyn CredentialProvider>,
        index: Arc<dyn IndexSink>,
    ) -> Self {
        let locks = LockManager::new(
            lock_store,
            Duration::from_millis(config.unlock_poll_ms),
        );
        Self {
            config,
            jobs,
            locks,
            executor,
            notifier,
            credentials,
            index,
        }
    }

    /// Create a sync job for a newly registered store.
    ///
    /// Priority derives from staleness; a `High` store is due
    /// immediately, others wait out their cadence. Re-registering an
    /// existing store is a no-op.
    #[tracing::instrument(skip(self, record), fields(store_id = %record.store_id))]
    pub async fn register_store(&self, record: &StoreRecord) -> Result<(), SyncError> {
        if self
            .jobs
            .get(&record.store_id)
            .await
            .map_err(|e| SyncError::from_message(e.to_string()))?
            .is_some()
        {
            debug!("Store already registered");
            return Ok(());
        }

        let now = now_millis();
        let priority = SyncPriority::from_staleness(record.last_synced_at, now);
        let next_run_at = match priority {
            SyncPriority::High => now,
            _ => now + self.config.interval_for(priority) as i64,
        };

        let job = SyncJob::new(record.store_id.clone(), priority, next_run_at);
        self.jobs
            .put(&job)
            .await
            .map_err(|e| SyncError::from_message(e.to_string()))?;

        info!(%priority, next_run_at, "Store registered for sync");
        crate::metrics::record_job_transition("registered");
        Ok(())
    }

    /// Remove a deactivated store: drop its job, clear lock ownership
    /// and delete its index namespaces.
    ///
    /// Waits for any in-flight sync to release its lock first so the
    /// deletion cannot race a run; a timeout proceeds with caution.
    #[tracing::instrument(skip(self))]
    pub async fn remove_store(&self, store_id: &str) -> Result<(), SyncError> {
        self.jobs
            .remove(store_id)
            .await
            .map_err(|e| SyncError::from_message(e.to_string()))?;

        let wait = Duration::from_millis(self.config.remove_unlock_wait_ms);
        if !self.locks.wait_for_unlock(store_id, wait).await {
            warn!(store_id, "Store still locked after wait, removing anyway");
        }
        self.locks.clear(store_id).await;

        for entity in EntityType::all() {
            let namespace = namespace_for(store_id, entity);
            if let Ok(stats) = self.index.describe_stats(&namespace).await {
                debug!(%namespace, documents = stats.document_count, "Deleting index namespace");
            }
            if let Err(e) = self.index.delete_namespace(&namespace).await {
                warn!(%namespace, error = %e, "Failed to delete index namespace");
            }
        }

        info!(store_id, "Store removed from scheduling");
        crate::metrics::record_job_transition("removed");
        Ok(())
    }

    /// Reset a `Paused` job back to `Pending`. The only path out of
    /// Paused besides a manual trigger. Returns whether a job was
    /// resumed.
    pub async fn resume_store(&self, store_id: &str) -> Result<bool, SyncError> {
        let Some(mut job) = self
            .jobs
            .get(store_id)
            .await
            .map_err(|e| SyncError::from_message(e.to_string()))?
        else {
            return Ok(false);
        };

        if job.status != JobStatus::Paused {
            return Ok(false);
        }

        job.status = JobStatus::Pending;
        job.retry_count = 0;
        job.next_run_at = now_millis();
        self.jobs
            .put(&job)
            .await
            .map_err(|e| SyncError::from_message(e.to_string()))?;

        info!(store_id, "Paused job resumed");
        crate::metrics::record_job_transition("resumed");
        Ok(true)
    }

    /// All jobs, sorted by store id — the data behind a status
    /// endpoint (`status`, `last_error`, `next_run_at` per store).
    pub async fn job_snapshots(&self) -> Result<Vec<SyncJob>, SyncError> {
        let mut jobs = self
            .jobs
            .list()
            .await
            .map_err(|e| SyncError::from_message(e.to_string()))?;
        jobs.sort_by(|a, b| a.store_id.cmp(&b.store_id));
        Ok(jobs)
    }

    /// Manual sync override for one store.
    ///
    /// Uses the `ManualSync` operation class; if the store's lock is
    /// held under any class this fails fast with a "lock busy" outcome
    /// rather than queuing or bypassing. A manual trigger is an
    /// explicit action, so it is allowed on a `Paused` job (and a
    /// successful run un-pauses it).
    #[tracing::instrument(skip(self))]
    pub async fn trigger_immediate(&self, store_id: &str) -> TriggerOutcome {
        self.process_job(store_id, OperationClass::ManualSync).await
    }

    /// Reconnection flow: serialize credential replacement against sync
    /// runs via the `Reconnection` lock class, then revalidate and
    /// reschedule the store.
    #[tracing::instrument(skip(self))]
    pub async fn reconnect_store(&self, store_id: &str) -> TriggerOutcome {
        let Some(mut job) = self.load_job(store_id).await else {
            return TriggerOutcome::failed(format!("store '{}' is not registered", store_id));
        };

        let holder = holder_token(OperationClass::Reconnection);
        let ttl = Duration::from_millis(self.config.reconnect_lock_ttl_ms);
        if let Err(e) = self
            .locks
            .acquire(store_id, OperationClass::Reconnection, &holder, ttl)
            .await
        {
            crate::metrics::record_job_run("reconnection", "busy");
            return TriggerOutcome::failed(e.to_string());
        }

        let outcome = match self.credentials.get_valid_credential(store_id).await {
            Ok(Some(_)) => {
                job.status = JobStatus::Pending;
                job.retry_count = 0;
                job.last_error = None;
                job.priority = SyncPriority::High;
                job.next_run_at = now_millis();
                match self.jobs.put(&job).await {
                    Ok(()) => {
                        info!(store_id, "Store reconnected, sync rescheduled");
                        crate::metrics::record_job_run("reconnection", "success");
                        TriggerOutcome::ok(BTreeMap::new())
                    }
                    Err(e) => TriggerOutcome::failed(e.to_string()),
                }
            }
            Ok(None) => {
                crate::metrics::record_job_run("reconnection", "failure");
                TriggerOutcome::failed(format!("store '{}' still has no valid credential", store_id))
            }
            Err(e) => {
                crate::metrics::record_job_run("reconnection", "failure");
                TriggerOutcome::failed(e.to_string())
            }
        };

        self.locks.release(store_id, &holder).await;
        outcome
    }

    /// One scheduling pass: select due jobs, skip locked stores, and
    /// dispatch the rest in bounded concurrent batches.
    ///
    /// Each job runs in its own task as an isolation boundary — one
    /// job's failure can never halt the tick loop or starve the others.
    pub async fn tick(&self) -> TickStats {
        let now = now_millis();
        let jobs = match self.jobs.list().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Tick aborted: job registry unavailable");
                return TickStats::default();
            }
        };
        crate::metrics::set_registered_jobs(jobs.len());

        // A Running job whose lock has vanished is an abandoned run
        // from a crashed process; reschedule it like any due job.
        let candidates: Vec<SyncJob> = jobs
            .into_iter()
            .filter(|job| {
                job.is_due(now) || (job.status == JobStatus::Running && job.next_run_at <= now)
            })
            .collect();

        let due = candidates.len();
        let mut skipped_locked = 0usize;
        let mut selected = Vec::with_capacity(candidates.len());
        for job in candidates {
            match self.locks.current(&job.store_id).await {
                Ok(Some(_)) => skipped_locked += 1,
                Ok(None) => selected.push(job),
                Err(e) => {
                    warn!(store_id = %job.store_id, error = %e, "Lock probe failed, skipping job");
                    skipped_locked += 1;
                }
            }
        }

        selected.sort_by_key(|job| (job.priority.rank(), job.next_run_at));

        let mut dispatched = 0usize;
        let batch_pause = Duration::from_millis(self.config.batch_pause_ms);
        let batches: Vec<&[SyncJob]> = selected.chunks(self.config.batch_size).collect();
        let batch_count = batches.len();

        for (i, batch) in batches.into_iter().enumerate() {
            let mut handles = Vec::with_capacity(batch.len());
            for job in batch {
                let scheduler = self.clone();
                let store_id = job.store_id.clone();
                handles.push(tokio::spawn(async move {
                    let outcome = scheduler
                        .process_job(&store_id, OperationClass::BackgroundSync)
                        .await;
                    if !outcome.success {
                        debug!(
                            store_id = %store_id,
                            error = outcome.error.as_deref().unwrap_or("unknown"),
                            "Background sync did not complete"
                        );
                    }
                }));
            }

            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Job task aborted unexpectedly");
                }
            }
            dispatched += batch.len();

            if i + 1 < batch_count {
                tokio::time::sleep(batch_pause).await;
            }
        }

        crate::metrics::record_tick(due, skipped_locked, dispatched);
        TickStats {
            due,
            skipped_locked,
            dispatched,
        }
    }

    /// Drive `tick()` on the configured interval until the shutdown
    /// channel flips to `true` (or its sender drops).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_interval_ms = self.config.tick_interval_ms,
            batch_size = self.config.batch_size,
            "Sync scheduler running"
        );

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stats = self.tick().await;
                    if stats.due > 0 {
                        debug!(
                            due = stats.due,
                            skipped_locked = stats.skipped_locked,
                            dispatched = stats.dispatched,
                            "Tick complete"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    // --- Per-job processing ---

    /// Acquire the store's lock, run the pipeline, update job state,
    /// release the lock. The release runs on every exit path.
    async fn process_job(&self, store_id: &str, class: OperationClass) -> TriggerOutcome {
        let Some(job) = self.load_job(store_id).await else {
            return TriggerOutcome::failed(format!("store '{}' is not registered", store_id));
        };

        let holder = holder_token(class);
        let ttl = Duration::from_millis(self.config.lock_ttl_ms);
        if let Err(e) = self.locks.acquire(store_id, class, &holder, ttl).await {
            crate::metrics::record_job_run(class.as_str(), "busy");
            return TriggerOutcome::failed(e.to_string());
        }

        // Everything under the lock is infallible-by-construction: the
        // executor reports errors instead of throwing, and job-state
        // writes degrade to logs. The release below is unconditional.
        let outcome = self.run_locked(job, class).await;
        self.locks.release(store_id, &holder).await;
        outcome
    }

    async fn run_locked(&self, mut job: SyncJob, class: OperationClass) -> TriggerOutcome {
        let started = now_millis();
        let since = job.last_run_at;

        job.status = JobStatus::Running;
        job.last_run_at = Some(started);
        self.put_job(&job).await;
        crate::metrics::record_job_transition("running");

        let report = self.executor.run(&job.store_id, since).await;

        if report.success {
            self.on_success(&mut job).await;
            crate::metrics::record_job_run(class.as_str(), "success");
            TriggerOutcome::ok(report.synced_counts)
        } else {
            let error = report
                .error
                .clone()
                .unwrap_or_else(|| SyncError::Network("sync failed".into()));
            self.on_failure(&mut job, &error).await;
            crate::metrics::record_job_run(class.as_str(), "failure");
            TriggerOutcome::failed(error.to_string())
        }
    }

    async fn on_success(&self, job: &mut SyncJob) {
        job.status = JobStatus::Completed;
        job.retry_count = 0;
        job.last_error = None;
        self.put_job(job).await;
        crate::metrics::record_job_transition("completed");

        // Recompute priority from (now zero) staleness, then schedule
        // the next scheduled run
        let now = now_millis();
        job.priority = SyncPriority::from_staleness(Some(now), now);
        job.next_run_at = now + self.config.interval_for(job.priority) as i64;
        job.status = JobStatus::Pending;
        self.put_job(job).await;

        debug!(
            store_id = %job.store_id,
            priority = %job.priority,
            next_run_at = job.next_run_at,
            "Sync completed, next run scheduled"
        );
    }

    /// The failure state machine.
    ///
    /// Validation failures pause the job immediately. Anything else
    /// consumes one retry; within budget the job goes back to Pending
    /// with an escalating backoff, past it the job pauses and the
    /// reconnection flag is raised — exactly once, on this transition.
    async fn on_failure(&self, job: &mut SyncJob, error: &SyncError) {
        let now = now_millis();
        job.last_error = Some(error.to_string());

        if error.class() == ErrorClass::Validation {
            job.status = JobStatus::Paused;
            self.put_job(job).await;
            warn!(store_id = %job.store_id, error = %error, "Validation failure, job paused");
            crate::metrics::record_job_transition("paused");
            return;
        }

        job.retry_count += 1;

        if job.retry_count >= self.config.max_job_retries {
            job.status = JobStatus::Paused;
            self.put_job(job).await;
            warn!(
                store_id = %job.store_id,
                retries = job.retry_count,
                error = %error,
                "Retry budget exhausted, job paused and flagged for reconnection"
            );
            crate::metrics::record_job_transition("paused");

            if let Err(e) = self
                .notifier
                .mark_needs_reconnection(&job.store_id, &error.to_string())
                .await
            {
                error!(store_id = %job.store_id, error = %e, "Failed to flag reconnection");
            }
            crate::metrics::record_reconnection_flagged();
            return;
        }

        job.status = JobStatus::Failed;
        self.put_job(job).await;
        crate::metrics::record_job_transition("failed");

        let backoff = self.config.failure_backoff_ms(job.retry_count);
        job.next_run_at = now.saturating_add(backoff as i64);
        job.status = JobStatus::Pending;
        self.put_job(job).await;

        info!(
            store_id = %job.store_id,
            retry = job.retry_count,
            backoff_ms = backoff,
            error = %error,
            "Sync failed, retry scheduled"
        );
    }

    async fn load_job(&self, store_id: &str) -> Option<SyncJob> {
        match self.jobs.get(store_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(store_id, error = %e, "Job lookup failed");
                None
            }
        }
    }

    /// Job-state writes inside a run degrade to logs: the run itself
    /// must not abort halfway because the registry hiccupped.
    async fn put_job(&self, job: &SyncJob) {
        if let Err(e) = self.jobs.put(job).await {
            error!(store_id = %job.store_id, error = %e, "Failed to persist job state");
        }
    }
}

fn holder_token(class: OperationClass) -> String {
    format!("{}:{}", class.as_str(), Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{
        DataSource, IndexDocument, NamespaceStats, SourceRecord, StoreDirectory,
    };
    use crate::resilience::circuit_breaker::SyncCircuits;
    use crate::storage::memory::{InMemoryJobStore, InMemoryLockStore};
    use async_trait::async_trait;
    use serde_json::json;

    struct EmptySource;

    #[async_trait]
    impl DataSource for EmptySource {
        async fn fetch_entities(
            &self,
            _credential: &str,
            _entity: EntityType,
            _since: Option<i64>,
        ) -> Result<Vec<SourceRecord>, SyncError> {
            Ok(vec![SourceRecord {
                id: "r1".into(),
                fields: json!({}),
                updated_at: None,
            }])
        }
    }

    struct AlwaysValid;

    #[async_trait]
    impl CredentialProvider for AlwaysValid {
        async fn get_valid_credential(&self, _store_id: &str) -> Result<Option<String>, SyncError> {
            Ok(Some("token".into()))
        }
    }

    struct NullIndex;

    #[async_trait]
    impl IndexSink for NullIndex {
        async fn upsert(&self, _ns: &str, _docs: &[IndexDocument]) -> Result<(), SyncError> {
            Ok(())
        }
        async fn delete_namespace(&self, _ns: &str) -> Result<(), SyncError> {
            Ok(())
        }
        async fn describe_stats(&self, _ns: &str) -> Result<NamespaceStats, SyncError> {
            Ok(NamespaceStats::default())
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl ReconnectNotifier for NullNotifier {
        async fn mark_needs_reconnection(&self, _s: &str, _r: &str) -> Result<(), SyncError> {
            Ok(())
        }
    }

    struct ActiveDirectory;

    #[async_trait]
    impl StoreDirectory for ActiveDirectory {
        async fn is_active(&self, _s: &str) -> Result<bool, SyncError> {
            Ok(true)
        }
        async fn set_last_synced(&self, _s: &str, _at: i64) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn scheduler() -> Scheduler {
        let config = Arc::new(SchedulerConfig::fast());
        let credentials: Arc<dyn CredentialProvider> = Arc::new(AlwaysValid);
        let index: Arc<dyn IndexSink> = Arc::new(NullIndex);
        let executor = Arc::new(SyncExecutor::new(
            config.clone(),
            Arc::new(EmptySource),
            credentials.clone(),
            index.clone(),
            Arc::new(ActiveDirectory),
            Arc::new(SyncCircuits::new()),
        ));
        Scheduler::new(
            config,
            Arc::new(InMemoryJobStore::new()),
            Arc::new(InMemoryLockStore::new()),
            executor,
            Arc::new(NullNotifier),
            credentials,
            index,
        )
    }

    fn store(id: &str, last_synced_at: Option<i64>) -> StoreRecord {
        StoreRecord {
            store_id: id.into(),
            active: true,
            last_synced_at,
        }
    }

    #[tokio::test]
    async fn test_register_never_synced_is_high_and_due() {
        let scheduler = scheduler();
        scheduler.register_store(&store("s1", None)).await.unwrap();

        let jobs = scheduler.job_snapshots().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].priority, SyncPriority::High);
        assert!(jobs[0].next_run_at <= now_millis());
    }

    #[tokio::test]
    async fn test_register_fresh_store_waits_out_cadence() {
        let scheduler = scheduler();
        let now = now_millis();
        scheduler
            .register_store(&store("s1", Some(now - 60_000)))
            .await
            .unwrap();

        let jobs = scheduler.job_snapshots().await.unwrap();
        assert_eq!(jobs[0].priority, SyncPriority::Low);
        assert!(jobs[0].next_run_at > now);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let scheduler = scheduler();
        scheduler.register_store(&store("s1", None)).await.unwrap();
        scheduler.register_store(&store("s1", None)).await.unwrap();

        assert_eq!(scheduler.job_snapshots().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_unregistered_store_fails_structured() {
        let scheduler = scheduler();
        let outcome = scheduler.trigger_immediate("ghost").await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not registered"));
    }

    #[tokio::test]
    async fn test_trigger_success_round_trip() {
        let scheduler = scheduler();
        scheduler.register_store(&store("s1", None)).await.unwrap();

        let outcome = scheduler.trigger_immediate("s1").await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        let counts = outcome.synced_counts.unwrap();
        assert_eq!(counts["products"], 1);

        let job = &scheduler.job_snapshots().await.unwrap()[0];
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.next_run_at > now_millis());
    }

    #[tokio::test]
    async fn test_manual_trigger_fails_fast_when_locked() {
        let scheduler = scheduler();
        scheduler.register_store(&store("s1", None)).await.unwrap();

        // Simulate an in-flight background sync holding the lock
        scheduler
            .locks
            .acquire(
                "s1",
                OperationClass::BackgroundSync,
                "bg-holder",
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        let outcome = scheduler.trigger_immediate("s1").await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("locked"));

        // The background holder is untouched
        let current = scheduler.locks.current("s1").await.unwrap().unwrap();
        assert_eq!(current.holder_id, "bg-holder");
    }

    #[tokio::test]
    async fn test_resume_requires_paused() {
        let scheduler = scheduler();
        scheduler.register_store(&store("s1", None)).await.unwrap();

        assert!(!scheduler.resume_store("s1").await.unwrap());
        assert!(!scheduler.resume_store("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_store_drops_job_and_lock() {
        let scheduler = scheduler();
        scheduler.register_store(&store("s1", None)).await.unwrap();
        scheduler.remove_store("s1").await.unwrap();

        assert!(scheduler.job_snapshots().await.unwrap().is_empty());
        assert!(scheduler.locks.current("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tick_dispatches_due_jobs() {
        let scheduler = scheduler();
        scheduler.register_store(&store("s1", None)).await.unwrap();
        scheduler.register_store(&store("s2", None)).await.unwrap();

        let stats = scheduler.tick().await;
        assert_eq!(stats.due, 2);
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.skipped_locked, 0);

        for job in scheduler.job_snapshots().await.unwrap() {
            assert_eq!(job.status, JobStatus::Pending);
            assert!(job.next_run_at > now_millis());
        }
    }

    #[tokio::test]
    async fn test_tick_skips_locked_stores() {
        let scheduler = scheduler();
        scheduler.register_store(&store("s1", None)).await.unwrap();
        scheduler
            .locks
            .acquire(
                "s1",
                OperationClass::Reconnection,
                "rc-holder",
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        let stats = scheduler.tick().await;
        assert_eq!(stats.due, 1);
        assert_eq!(stats.skipped_locked, 1);
        assert_eq!(stats.dispatched, 0);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let scheduler = scheduler();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler.clone().run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_resets_job() {
        let scheduler = scheduler();
        scheduler.register_store(&store("s1", None)).await.unwrap();

        // Push the job into Paused by hand via the store
        let mut job = scheduler.jobs.get("s1").await.unwrap().unwrap();
        job.status = JobStatus::Paused;
        job.retry_count = 3;
        job.last_error = Some("network error: down".into());
        scheduler.jobs.put(&job).await.unwrap();

        let outcome = scheduler.reconnect_store("s1").await;
        assert!(outcome.success);

        let job = scheduler.jobs.get("s1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.priority, SyncPriority::High);
        assert!(job.last_error.is_none());

        // Lock released afterwards
        assert!(scheduler.locks.current("s1").await.unwrap().is_none());
    }
}
