// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker for external dependencies.
//!
//! One breaker per named dependency (store-info API, entity fetch,
//! index upsert). Tracks outcome failures inside a monitoring window
//! and "trips" when the threshold is crossed.
//!
//! States:
//! - Closed: normal operation, requests pass through
//! - Open: dependency unhealthy, requests fail-fast without attempting
//! - HalfOpen: testing recovery, exactly one trial call allowed
//!
//! The breaker wraps the *whole* retry-wrapped operation as one
//! outcome: an operation that needed three attempts before succeeding
//! is one success here, not three failures and a success.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::SyncError;

/// Circuit breaker state for metrics/monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open)
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Outcome failures inside `monitoring_period` that trip the circuit
    pub failure_threshold: u32,
    /// Rolling window over which failures are counted
    pub monitoring_period: Duration,
    /// How long to stay open before allowing a half-open trial
    pub reset_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            monitoring_period: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    /// Aggressive config for critical dependencies (trips faster,
    /// recovers cautiously)
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            monitoring_period: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(60),
        }
    }

    /// Lenient config for dependencies that flake under load
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            monitoring_period: Duration::from_secs(120),
            reset_timeout: Duration::from_secs(15),
        }
    }

    /// Fast recovery for tests
    #[must_use]
    pub fn fast() -> Self {
        Self {
            failure_threshold: 2,
            monitoring_period: Duration::from_secs(10),
            reset_timeout: Duration::from_millis(50),
        }
    }
}

struct BreakerCore {
    state: CircuitState,
    failure_count: u32,
    window_start: Instant,
    opened_at: Instant,
    /// The single permitted half-open trial is in flight.
    trial_in_flight: bool,
}

/// A named circuit breaker with metrics tracking.
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    core: Mutex<BreakerCore>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config.
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let now = Instant::now();
        Self {
            name: name.into(),
            config,
            core: Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                failure_count: 0,
                window_start: now,
                opened_at: now,
                trial_in_flight: false,
            }),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Create with default config.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    /// Get the circuit breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// Execute an async operation through the circuit breaker.
    ///
    /// Takes a closure that returns a Future, allowing lazy evaluation —
    /// a rejected call never constructs the operation's future.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let trial = match self.admit() {
            Some(trial) => trial,
            None => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(circuit = %self.name, "Circuit breaker rejected call (open)");
                crate::metrics::record_circuit_call(&self.name, "rejected");
                return Err(CircuitError::Rejected);
            }
        };

        match f().await {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.settle_success(trial);
                debug!(circuit = %self.name, "Circuit call succeeded");
                crate::metrics::record_circuit_call(&self.name, "success");
                Ok(result)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.settle_failure(trial);
                debug!(circuit = %self.name, "Circuit call failed");
                crate::metrics::record_circuit_call(&self.name, "failure");
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Like [`call`](Self::call) for [`SyncError`] operations, with
    /// rejection flattened into [`SyncError::CircuitOpen`].
    pub async fn guard<F, Fut, T>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        match self.call(f).await {
            Ok(value) => Ok(value),
            Err(CircuitError::Rejected) => Err(SyncError::CircuitOpen(self.name.clone())),
            Err(CircuitError::Inner(e)) => Err(e),
        }
    }

    /// Decide whether a call may proceed. Returns `Some(is_trial)` to
    /// admit, `None` to reject.
    fn admit(&self) -> Option<bool> {
        let mut core = self.core.lock();
        match core.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                if core.opened_at.elapsed() >= self.config.reset_timeout {
                    core.state = CircuitState::HalfOpen;
                    core.trial_in_flight = true;
                    debug!(circuit = %self.name, "Circuit entering half-open trial");
                    crate::metrics::set_circuit_state(&self.name, CircuitState::HalfOpen as u8);
                    Some(true)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if core.trial_in_flight {
                    None
                } else {
                    core.trial_in_flight = true;
                    Some(true)
                }
            }
        }
    }

    fn settle_success(&self, trial: bool) {
        if !trial {
            return;
        }
        let mut core = self.core.lock();
        core.state = CircuitState::Closed;
        core.failure_count = 0;
        core.window_start = Instant::now();
        core.trial_in_flight = false;
        debug!(circuit = %self.name, "Half-open trial succeeded, circuit closed");
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
    }

    fn settle_failure(&self, trial: bool) {
        let mut core = self.core.lock();

        if trial {
            core.state = CircuitState::Open;
            core.opened_at = Instant::now();
            core.trial_in_flight = false;
            warn!(circuit = %self.name, "Half-open trial failed, circuit reopened");
            crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
            return;
        }

        if core.state != CircuitState::Closed {
            // A pre-trip call finished after the circuit already opened
            return;
        }

        if core.window_start.elapsed() > self.config.monitoring_period {
            core.window_start = Instant::now();
            core.failure_count = 1;
        } else {
            core.failure_count += 1;
        }

        if core.failure_count >= self.config.failure_threshold {
            core.state = CircuitState::Open;
            core.opened_at = Instant::now();
            warn!(
                circuit = %self.name,
                failures = core.failure_count,
                "Failure threshold reached, circuit opened"
            );
            crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
        }
    }

    /// Get total number of calls.
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get number of successful calls.
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors).
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open).
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

/// Pre-configured circuit breakers for the sync pipeline's dependencies.
pub struct SyncCircuits {
    /// Store metadata / credential verification calls
    pub store_info: CircuitBreaker,
    /// Entity fetches from the commerce platform
    pub entity_fetch: CircuitBreaker,
    /// Upserts into the search index
    pub index_upsert: CircuitBreaker,
}

impl Default for SyncCircuits {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncCircuits {
    /// Create circuits with per-dependency configs.
    pub fn new() -> Self {
        Self {
            // Verification gates the whole pipeline: trip fast
            store_info: CircuitBreaker::new("store-info-api", CircuitConfig::aggressive()),
            // Fetches flake under load; partial data is tolerated
            entity_fetch: CircuitBreaker::new("entity-fetch", CircuitConfig::lenient()),
            index_upsert: CircuitBreaker::new("index-upsert", CircuitConfig::default()),
        }
    }

    /// Uniform config across all circuits (tests).
    pub fn with_config(config: CircuitConfig) -> Self {
        Self {
            store_info: CircuitBreaker::new("store-info-api", config.clone()),
            entity_fetch: CircuitBreaker::new("entity-fetch", config.clone()),
            index_upsert: CircuitBreaker::new("index-upsert", config),
        }
    }
}
