//! Resilience layer: retry with backoff and circuit breakers.
//!
//! Every external call made by the sync pipeline goes through both
//! layers, breaker outside retry: a call that needed three attempts
//! before succeeding counts as one success toward the breaker, so
//! normal transient-retry traffic can never trip it.

pub mod circuit_breaker;
pub mod retry;
