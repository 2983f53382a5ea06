// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync scheduler.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `store_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `class`: manual_sync, background_sync, reconnection
//! - `stage`: verify, fetch, transform, index, bookkeeping
//! - `status`: success, failure, rejected, skipped

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the outcome of one job run.
pub fn record_job_run(class: &str, status: &str) {
    counter!(
        "store_sync_job_runs_total",
        "class" => class.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a job status transition.
pub fn record_job_transition(status: &str) {
    counter!(
        "store_sync_job_transitions_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record one scheduler tick's selection numbers.
pub fn record_tick(due: usize, skipped_locked: usize, dispatched: usize) {
    counter!("store_sync_ticks_total").increment(1);
    counter!("store_sync_jobs_due_total").increment(due as u64);
    counter!("store_sync_jobs_skipped_locked_total").increment(skipped_locked as u64);
    counter!("store_sync_jobs_dispatched_total").increment(dispatched as u64);
}

/// Set the number of registered jobs.
pub fn set_registered_jobs(count: usize) {
    gauge!("store_sync_registered_jobs").set(count as f64);
}

/// Record a lock event (acquired, conflict, released, reclaimed).
pub fn record_lock_event(class: &str, event: &str) {
    counter!(
        "store_sync_lock_events_total",
        "class" => class.to_string(),
        "event" => event.to_string()
    )
    .increment(1);
}

/// Record a circuit breaker call outcome.
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "store_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set circuit breaker state (0 = closed, 1 = half-open, 2 = open).
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "store_sync_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record a retry-wrapped operation's final outcome.
pub fn record_retry_outcome(operation: &str, outcome: &str, attempts: u32) {
    counter!(
        "store_sync_retry_outcomes_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "store_sync_retry_attempts",
        "operation" => operation.to_string()
    )
    .record(attempts as f64);
}

/// Record one pipeline stage's outcome.
pub fn record_stage(stage: &str, status: &str) {
    counter!(
        "store_sync_stage_outcomes_total",
        "stage" => stage.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record pipeline stage latency.
pub fn record_stage_latency(stage: &str, duration: Duration) {
    histogram!(
        "store_sync_stage_seconds",
        "stage" => stage.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record documents indexed for an entity type.
pub fn record_documents_indexed(entity: &str, count: usize) {
    counter!(
        "store_sync_documents_indexed_total",
        "entity" => entity.to_string()
    )
    .increment(count as u64);
}

/// Record a needs-reconnection signal.
pub fn record_reconnection_flagged() {
    counter!("store_sync_reconnections_flagged_total").increment(1);
}
