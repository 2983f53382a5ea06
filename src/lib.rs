//! # Store Sync Scheduler
//!
//! Connects an e-commerce platform's stores to a searchable index:
//! decides when each store's data is re-fetched and re-indexed,
//! guarantees that competing triggers never run conflicting work
//! concurrently for the same store, and wraps every external call in
//! retry/circuit-breaker discipline so transient failures don't
//! cascade.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Triggers                             │
//! │  • Periodic timer (tick)                                    │
//! │  • Manual sync request                                      │
//! │  • Reconnection flow                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Scheduler                             │
//! │  • Job registry (one SyncJob per store)                     │
//! │  • Priority from staleness, bounded batch dispatch          │
//! │  • Failure state machine: backoff → pause → reconnection    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (per-store mutual exclusion)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Lock Manager                           │
//! │  • One slot per store across all operation classes          │
//! │  • TTL-based stale-lock reclamation (crash safety)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Sync Executor                           │
//! │  verify → fetch → transform → index → bookkeeping           │
//! │  every external call: circuit breaker outside retry         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::watch;
//! use storesync::{
//!     Scheduler, SchedulerConfig, StoreRecord, SyncExecutor, SyncCircuits,
//!     InMemoryJobStore, InMemoryLockStore,
//! };
//! # use storesync::{DataSource, CredentialProvider, IndexSink, ReconnectNotifier, StoreDirectory};
//!
//! # async fn example(
//! #     source: Arc<dyn DataSource>,
//! #     credentials: Arc<dyn CredentialProvider>,
//! #     index: Arc<dyn IndexSink>,
//! #     directory: Arc<dyn StoreDirectory>,
//! #     notifier: Arc<dyn ReconnectNotifier>,
//! # ) {
//! let config = Arc::new(SchedulerConfig::default());
//! let executor = Arc::new(SyncExecutor::new(
//!     config.clone(),
//!     source,
//!     credentials.clone(),
//!     index.clone(),
//!     directory,
//!     Arc::new(SyncCircuits::new()),
//! ));
//!
//! let scheduler = Scheduler::new(
//!     config,
//!     Arc::new(InMemoryJobStore::new()),
//!     Arc::new(InMemoryLockStore::new()),
//!     executor,
//!     notifier,
//!     credentials,
//!     index,
//! );
//!
//! // The embedder owns the run loop and its shutdown signal
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(scheduler.clone().run(shutdown_rx));
//!
//! scheduler.register_store(&StoreRecord {
//!     store_id: "store-1".into(),
//!     active: true,
//!     last_synced_at: None,
//! }).await.expect("register failed");
//!
//! let outcome = scheduler.trigger_immediate("store-1").await;
//! println!("manual sync: success={}", outcome.success);
//!
//! shutdown_tx.send(true).ok();
//! handle.await.ok();
//! # }
//! ```
//!
//! ## Features
//!
//! - **Priority scheduling**: staleness-derived priority, bounded batch
//!   dispatch per tick
//! - **Strict per-store serialization**: manual sync, background sync
//!   and reconnection are mutually exclusive, fail-fast on conflict
//! - **Crash-safe locks**: TTL-based reclamation, idempotent release
//! - **Resilient calls**: classified retry with jittered backoff inside
//!   named circuit breakers
//! - **Partial-failure tolerance**: one entity type failing doesn't
//!   abort the others; partial data beats no data
//! - **Injectable stores**: in-memory for single-instance, Redis-backed
//!   for multi-instance deployments
//!
//! ## Modules
//!
//! - [`scheduler`]: the [`Scheduler`] orchestrating jobs and triggers
//! - [`executor`]: the five-stage [`SyncExecutor`] pipeline
//! - [`lock`]: per-store mutual exclusion with stale-lock reclamation
//! - [`resilience`]: circuit breakers and retry policies
//! - [`storage`]: job/lock store traits with memory and Redis backends
//! - [`connectors`]: collaborator traits implemented by the host

pub mod config;
pub mod connectors;
pub mod error;
pub mod executor;
pub mod job;
pub mod lock;
pub mod metrics;
pub mod resilience;
pub mod scheduler;
pub mod storage;

pub use config::SchedulerConfig;
pub use connectors::{
    namespace_for, CredentialProvider, DataSource, EntityType, IndexDocument, IndexSink,
    NamespaceStats, ReconnectNotifier, SourceRecord, StoreDirectory,
};
pub use error::{classify_message, ErrorClass, SyncError};
pub use executor::{StageOutcome, SyncExecutor, SyncReport, SyncStage};
pub use job::{now_millis, JobStatus, StoreRecord, SyncJob, SyncPriority};
pub use lock::LockManager;
pub use resilience::circuit_breaker::{
    CircuitBreaker, CircuitConfig, CircuitError, CircuitState, SyncCircuits,
};
pub use resilience::retry::{execute_with_retry, RetryPolicy};
pub use scheduler::{Scheduler, TickStats, TriggerOutcome};
pub use storage::memory::{InMemoryJobStore, InMemoryLockStore};
pub use storage::redis::{RedisJobStore, RedisLockStore};
pub use storage::traits::{
    AcquireOutcome, JobStore, LockRecord, LockStore, OperationClass, StorageError,
};
