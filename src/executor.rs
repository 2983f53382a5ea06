// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The sync pipeline: one store's synchronization as an
//! independently-failable multi-stage run.
//!
//! Stages: verify → fetch → transform → index → bookkeeping. Every
//! external call goes through the resilience layer (breaker outside
//! retry), and every stage runs under its own timeout. A timeout is
//! cooperative cancellation: stop waiting, record the failure, carry on
//! with whatever completed.
//!
//! Partial data beats no data: the run counts as successful when the
//! index stage succeeds for at least one entity type, even if some
//! fetches failed along the way. The [`SyncReport`] enumerates
//! per-stage outcomes so the scheduler never re-derives success from
//! exceptions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::connectors::{
    namespace_for, CredentialProvider, DataSource, EntityType, IndexDocument, IndexSink,
    SourceRecord, StoreDirectory,
};
use crate::error::SyncError;
use crate::job::now_millis;
use crate::resilience::circuit_breaker::SyncCircuits;
use crate::resilience::retry::{execute_with_retry, RetryPolicy};

/// Pipeline stage names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncStage {
    Verify,
    Fetch,
    Transform,
    Index,
    Bookkeeping,
}

impl SyncStage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Fetch => "fetch",
            Self::Transform => "transform",
            Self::Index => "index",
            Self::Bookkeeping => "bookkeeping",
        }
    }
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StageOutcome {
    pub stage: SyncStage,
    pub success: bool,
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

/// Structured result of one store's sync run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub store_id: String,
    /// True when the index stage succeeded for at least one entity type
    /// (or there was nothing to index and nothing went wrong).
    pub success: bool,
    /// Documents indexed per entity type.
    pub synced_counts: BTreeMap<String, usize>,
    pub stages: Vec<StageOutcome>,
    /// Human-readable notes for partial failures.
    pub actions: Vec<String>,
    /// Dominant error when `success` is false, classified for the
    /// scheduler's failure state machine.
    pub error: Option<SyncError>,
    pub started_at: i64,
    pub elapsed_ms: u64,
}

struct StageTimer {
    stage: SyncStage,
    start: Instant,
}

impl StageTimer {
    fn new(stage: SyncStage) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }

    fn finish(self, success: bool, detail: Option<String>) -> StageOutcome {
        let elapsed = self.start.elapsed();
        crate::metrics::record_stage(self.stage.as_str(), if success { "success" } else { "failure" });
        crate::metrics::record_stage_latency(self.stage.as_str(), elapsed);
        StageOutcome {
            stage: self.stage,
            success,
            detail,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Executes one store's synchronization pipeline.
pub struct SyncExecutor {
    source: Arc<dyn DataSource>,
    credentials: Arc<dyn CredentialProvider>,
    index: Arc<dyn IndexSink>,
    directory: Arc<dyn StoreDirectory>,
    circuits: Arc<SyncCircuits>,
    config: Arc<SchedulerConfig>,
}

impl SyncExecutor {
    pub fn new(
        config: Arc<SchedulerConfig>,
        source: Arc<dyn DataSource>,
        credentials: Arc<dyn CredentialProvider>,
        index: Arc<dyn IndexSink>,
        directory: Arc<dyn StoreDirectory>,
        circuits: Arc<SyncCircuits>,
    ) -> Self {
        Self {
            source,
            credentials,
            index,
            directory,
            circuits,
            config,
        }
    }

    /// Run the full pipeline for one store.
    ///
    /// `since` bounds the fetch to records modified after that time
    /// (epoch millis); `None` means a full sync. Stage errors are
    /// recorded in the report, never thrown.
    #[tracing::instrument(skip(self), fields(store_id = %store_id))]
    pub async fn run(&self, store_id: &str, since: Option<i64>) -> SyncReport {
        let started_at = now_millis();
        let run_start = Instant::now();
        let mut stages = Vec::with_capacity(5);
        let mut actions = Vec::new();
        let mut synced_counts = BTreeMap::new();

        // ---- Stage 1: Verify ----
        let timer = StageTimer::new(SyncStage::Verify);
        let verify_budget = Duration::from_millis(self.config.verify_timeout_ms);
        let credential = match timeout(verify_budget, self.verify(store_id)).await {
            Ok(Ok(credential)) => {
                stages.push(timer.finish(true, None));
                credential
            }
            Ok(Err(e)) => {
                warn!(store_id, error = %e, "Verification failed, aborting sync");
                stages.push(timer.finish(false, Some(e.to_string())));
                return self.aborted(store_id, started_at, run_start, stages, actions, e);
            }
            Err(_) => {
                let e = SyncError::Timeout(format!(
                    "verification exceeded {}ms",
                    self.config.verify_timeout_ms
                ));
                stages.push(timer.finish(false, Some(e.to_string())));
                return self.aborted(store_id, started_at, run_start, stages, actions, e);
            }
        };

        // ---- Stage 2: Fetch (parallel, per-entity isolation) ----
        let timer = StageTimer::new(SyncStage::Fetch);
        let (fetched, fetch_errors) = self.fetch_all(store_id, &credential, since).await;

        for (entity, error) in &fetch_errors {
            actions.push(format!("{} fetch failed: {}", entity, error));
        }

        let fetch_detail = format!(
            "{}/{} entity types fetched",
            fetched.len(),
            EntityType::all().len()
        );
        stages.push(timer.finish(!fetched.is_empty(), Some(fetch_detail)));

        if fetched.is_empty() {
            let error = fetch_errors
                .into_iter()
                .map(|(_, e)| e)
                .next()
                .unwrap_or_else(|| SyncError::Network("no entity type could be fetched".into()));
            return self.aborted(store_id, started_at, run_start, stages, actions, error);
        }

        // ---- Stage 3: Transform ----
        let timer = StageTimer::new(SyncStage::Transform);
        let batches = self.transform(store_id, &fetched);
        let total_docs: usize = batches.iter().map(|(_, docs)| docs.len()).sum();
        stages.push(timer.finish(true, Some(format!("{} documents prepared", total_docs))));

        // ---- Stage 4: Index ----
        let timer = StageTimer::new(SyncStage::Index);
        let mut attempted = 0usize;
        let mut upserted = 0usize;
        let mut index_error: Option<SyncError> = None;

        for (entity, docs) in &batches {
            if docs.is_empty() {
                synced_counts.insert(entity.as_str().to_string(), 0);
                continue;
            }

            attempted += 1;
            match self.upsert_batch(store_id, *entity, docs).await {
                Ok(()) => {
                    upserted += 1;
                    synced_counts.insert(entity.as_str().to_string(), docs.len());
                    crate::metrics::record_documents_indexed(entity.as_str(), docs.len());
                }
                Err(e) => {
                    actions.push(format!("{} index upsert failed: {}", entity, e));
                    if index_error.is_none() {
                        index_error = Some(e);
                    }
                }
            }
        }

        // The run fails only when the index stage failed entirely
        let index_ok = attempted == 0 || upserted > 0;
        stages.push(timer.finish(
            index_ok,
            Some(format!("{}/{} entity batches upserted", upserted, attempted)),
        ));

        if !index_ok {
            let error = index_error
                .unwrap_or_else(|| SyncError::Network("index stage failed".into()));
            return self.aborted(store_id, started_at, run_start, stages, actions, error);
        }

        // ---- Stage 5: Bookkeeping (best effort) ----
        let timer = StageTimer::new(SyncStage::Bookkeeping);
        match self.bookkeeping(store_id).await {
            Ok(()) => stages.push(timer.finish(true, None)),
            Err(e) => {
                warn!(store_id, error = %e, "Bookkeeping failed (non-fatal)");
                actions.push(format!("bookkeeping failed: {}", e));
                stages.push(timer.finish(false, Some(e.to_string())));
            }
        }

        info!(
            store_id,
            documents = total_docs,
            partial = !fetch_errors.is_empty(),
            elapsed_ms = run_start.elapsed().as_millis() as u64,
            "Sync run completed"
        );

        SyncReport {
            store_id: store_id.to_string(),
            success: true,
            synced_counts,
            stages,
            actions,
            error: None,
            started_at,
            elapsed_ms: run_start.elapsed().as_millis() as u64,
        }
    }

    /// Confirm the store is active and has a usable credential.
    async fn verify(&self, store_id: &str) -> Result<String, SyncError> {
        let directory = self.directory.clone();
        let credentials = self.credentials.clone();
        let store = store_id.to_string();
        let policy = RetryPolicy::api();

        self.circuits
            .store_info
            .guard(|| {
                execute_with_retry("verify_store", &policy, || {
                    let directory = directory.clone();
                    let credentials = credentials.clone();
                    let store = store.clone();
                    async move {
                        if !directory.is_active(&store).await? {
                            return Err(SyncError::Validation(format!(
                                "store '{}' is not active",
                                store
                            )));
                        }
                        match credentials.get_valid_credential(&store).await? {
                            Some(credential) => Ok(credential),
                            None => Err(SyncError::Auth(format!(
                                "no valid credential for store '{}'",
                                store
                            ))),
                        }
                    }
                })
            })
            .await
    }

    /// Fetch every entity type concurrently; a single entity's failure
    /// does not abort the others.
    async fn fetch_all(
        &self,
        store_id: &str,
        credential: &str,
        since: Option<i64>,
    ) -> (Vec<(EntityType, Vec<SourceRecord>)>, Vec<(EntityType, SyncError)>) {
        let budget = Duration::from_millis(self.config.fetch_timeout_ms);
        let mut handles = Vec::with_capacity(EntityType::all().len());

        for entity in EntityType::all() {
            let source = self.source.clone();
            let circuits = self.circuits.clone();
            let credential = credential.to_string();

            let handle = tokio::spawn(async move {
                let label = format!("fetch_{}", entity);
                let policy = RetryPolicy::api();
                let attempt = circuits.entity_fetch.guard(|| {
                    execute_with_retry(&label, &policy, || {
                        let source = source.clone();
                        let credential = credential.clone();
                        async move { source.fetch_entities(&credential, entity, since).await }
                    })
                });

                match timeout(budget, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout(format!(
                        "{} fetch exceeded {}ms",
                        entity,
                        budget.as_millis()
                    ))),
                }
            });
            handles.push((entity, handle));
        }

        let mut fetched = Vec::new();
        let mut errors = Vec::new();
        for (entity, handle) in handles {
            match handle.await {
                Ok(Ok(records)) => {
                    debug!(store_id, %entity, count = records.len(), "Entity fetch succeeded");
                    fetched.push((entity, records));
                }
                Ok(Err(e)) => errors.push((entity, e)),
                Err(join_err) => errors.push((
                    entity,
                    SyncError::Network(format!("{} fetch task aborted: {}", entity, join_err)),
                )),
            }
        }
        (fetched, errors)
    }

    /// Convert raw records into index documents, one batch per entity.
    /// Records without an id cannot be addressed in the index and are
    /// skipped.
    fn transform(
        &self,
        store_id: &str,
        fetched: &[(EntityType, Vec<SourceRecord>)],
    ) -> Vec<(EntityType, Vec<IndexDocument>)> {
        fetched
            .iter()
            .map(|(entity, records)| {
                let namespace = namespace_for(store_id, *entity);
                let mut skipped = 0usize;
                let docs: Vec<IndexDocument> = records
                    .iter()
                    .filter_map(|record| {
                        if record.id.is_empty() {
                            skipped += 1;
                            return None;
                        }
                        Some(IndexDocument {
                            id: record.id.clone(),
                            namespace: namespace.clone(),
                            body: json!({
                                "store_id": store_id,
                                "entity": entity.as_str(),
                                "updated_at": record.updated_at,
                                "fields": record.fields,
                            }),
                        })
                    })
                    .collect();
                if skipped > 0 {
                    warn!(store_id, %entity, skipped, "Skipped records without ids");
                }
                (*entity, docs)
            })
            .collect()
    }

    async fn upsert_batch(
        &self,
        store_id: &str,
        entity: EntityType,
        docs: &[IndexDocument],
    ) -> Result<(), SyncError> {
        let namespace = namespace_for(store_id, entity);
        let budget = Duration::from_millis(self.config.index_timeout_ms);
        let label = format!("index_{}", entity);
        let policy = RetryPolicy::index();
        let index = self.index.clone();

        let attempt = self.circuits.index_upsert.guard(|| {
            execute_with_retry(&label, &policy, || {
                let index = index.clone();
                let namespace = namespace.clone();
                async move { index.upsert(&namespace, docs).await }
            })
        });

        match timeout(budget, attempt).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "{} upsert exceeded {}ms",
                entity,
                budget.as_millis()
            ))),
        }
    }

    async fn bookkeeping(&self, store_id: &str) -> Result<(), SyncError> {
        let budget = Duration::from_millis(self.config.bookkeeping_timeout_ms);
        let now = now_millis();
        let directory = self.directory.clone();
        let store = store_id.to_string();
        let policy = RetryPolicy::api();

        let attempt = self.circuits.store_info.guard(|| {
            execute_with_retry("set_last_synced", &policy, || {
                let directory = directory.clone();
                let store = store.clone();
                async move { directory.set_last_synced(&store, now).await }
            })
        });

        match timeout(budget, attempt).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "bookkeeping exceeded {}ms",
                budget.as_millis()
            ))),
        }
    }

    fn aborted(
        &self,
        store_id: &str,
        started_at: i64,
        run_start: Instant,
        stages: Vec<StageOutcome>,
        actions: Vec<String>,
        error: SyncError,
    ) -> SyncReport {
        SyncReport {
            store_id: store_id.to_string(),
            success: false,
            synced_counts: BTreeMap::new(),
            stages,
            actions,
            error: Some(error),
            started_at,
            elapsed_ms: run_start.elapsed().as_millis() as u64,
        }
    }
}
