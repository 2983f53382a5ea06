// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy shared by the retry and circuit-breaker layers.
//!
//! Every failure from an external collaborator is expressed as a
//! [`SyncError`], whose [`ErrorClass`] decides retryability: only
//! `Network`, `Timeout` and `RateLimit` are retryable. `Auth` and
//! `Validation` fail immediately without consuming retry budget.
//! `Conflict` (lock busy) is explicitly not a failure — callers report
//! "busy" or retry later.

use std::time::Duration;
use thiserror::Error;

/// A classified failure from an external call or coordination primitive.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("rate limited")]
    RateLimit {
        /// Server-provided delay to honor before the next attempt, if any.
        retry_after: Option<Duration>,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// An unexpired lock exists for the store under some operation class.
    #[error("lock busy: {0}")]
    LockBusy(String),

    /// The named circuit breaker is open; the call was never attempted.
    #[error("circuit '{0}' open, request rejected")]
    CircuitOpen(String),
}

/// Coarse classification used for retry decisions and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Network,
    Timeout,
    RateLimit,
    Auth,
    Validation,
    Conflict,
    Unavailable,
}

impl ErrorClass {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl SyncError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) => ErrorClass::Network,
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::RateLimit { .. } => ErrorClass::RateLimit,
            Self::Auth(_) => ErrorClass::Auth,
            Self::Validation(_) => ErrorClass::Validation,
            Self::LockBusy(_) => ErrorClass::Conflict,
            Self::CircuitOpen(_) => ErrorClass::Unavailable,
        }
    }

    /// Whether the retry layer may re-attempt the call.
    ///
    /// An open circuit is not retryable at the call level — the breaker
    /// would reject every attempt instantly and burn the budget for
    /// nothing. The job-level backoff handles it instead.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Network | ErrorClass::Timeout | ErrorClass::RateLimit
        )
    }

    /// Server-provided delay for rate-limit responses, if present.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify a raw error message from a collaborator that doesn't
    /// produce typed errors (HTTP clients, driver errors, ...).
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match classify_message(&message) {
            ErrorClass::Timeout => Self::Timeout(message),
            ErrorClass::RateLimit => Self::RateLimit { retry_after: None },
            ErrorClass::Auth => Self::Auth(message),
            ErrorClass::Validation => Self::Validation(message),
            // Conflict/Unavailable never come from raw text
            _ => Self::Network(message),
        }
    }
}

/// Map raw error text onto the taxonomy.
///
/// The rule set is intentionally small: well-known driver phrases and
/// HTTP status markers. Anything unrecognized is treated as a network
/// error, the retryable default for external calls.
#[must_use]
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();

    if lower.contains("timed out") || lower.contains("timeout") || lower.contains("deadline") {
        ErrorClass::Timeout
    } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        ErrorClass::RateLimit
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("invalid token")
        || lower.contains("invalid_grant")
    {
        ErrorClass::Auth
    } else if lower.contains("400") || lower.contains("422") || lower.contains("invalid request") || lower.contains("malformed") {
        ErrorClass::Validation
    } else {
        ErrorClass::Network
    }
}
