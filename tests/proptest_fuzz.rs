//! Property-based tests for the scheduling and resilience primitives.
//!
//! Uses proptest to generate arbitrary inputs and check the invariants
//! the scheduler leans on: backoff never shrinks, classification is
//! total, priority tracks staleness monotonically, and job records
//! survive serialization.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::time::Duration;

use proptest::prelude::*;

use storesync::{
    classify_message, ErrorClass, JobStatus, RetryPolicy, SchedulerConfig, SyncJob, SyncPriority,
};

fn retry_policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (
        1u32..=10,          // max_attempts
        1u64..=5_000,       // base delay ms
        1.0f64..=8.0,       // multiplier
        0u64..=60_000,      // extra headroom for max delay
        0u64..=2_000,       // jitter ms
    )
        .prop_map(|(max_attempts, base_ms, multiplier, headroom_ms, jitter_ms)| RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            backoff_multiplier: multiplier,
            max_delay: Duration::from_millis(base_ms + headroom_ms),
            jitter: Duration::from_millis(jitter_ms),
        })
}

proptest! {
    /// Backoff is non-decreasing across consecutive attempts for any
    /// fixed policy.
    #[test]
    fn retry_delay_is_non_decreasing(policy in retry_policy_strategy(), attempts in 2u32..40) {
        let mut previous = Duration::ZERO;
        for attempt in 0..attempts {
            let delay = policy.delay_for(attempt);
            prop_assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            previous = delay;
        }
    }

    /// Delays never exceed the policy cap.
    #[test]
    fn retry_delay_respects_cap(policy in retry_policy_strategy(), attempt in 0u32..100) {
        prop_assert!(policy.delay_for(attempt) <= policy.max_delay);
    }

    /// The classifier is total: any string maps to exactly one class
    /// without panicking, and unknown text is retryable-by-default
    /// network territory.
    #[test]
    fn classify_message_is_total(message in ".*") {
        let class = classify_message(&message);
        prop_assert!(matches!(
            class,
            ErrorClass::Network
                | ErrorClass::Timeout
                | ErrorClass::RateLimit
                | ErrorClass::Auth
                | ErrorClass::Validation
        ));
    }

    /// More staleness never yields a lower priority.
    #[test]
    fn priority_tracks_staleness_monotonically(
        now in 1_700_000_000_000i64..1_900_000_000_000,
        elapsed_a in 0i64..(72 * 60 * 60 * 1000),
        elapsed_b in 0i64..(72 * 60 * 60 * 1000),
    ) {
        let (fresh, stale) = if elapsed_a <= elapsed_b {
            (elapsed_a, elapsed_b)
        } else {
            (elapsed_b, elapsed_a)
        };
        let fresher = SyncPriority::from_staleness(Some(now - fresh), now);
        let staler = SyncPriority::from_staleness(Some(now - stale), now);
        // Lower rank = higher priority
        prop_assert!(staler.rank() <= fresher.rank());
    }

    /// Never-synced is the top priority regardless of clock value.
    #[test]
    fn never_synced_is_always_high(now in i64::MIN / 2..i64::MAX / 2) {
        prop_assert_eq!(SyncPriority::from_staleness(None, now), SyncPriority::High);
    }

    /// Job-level failure backoff grows monotonically and never
    /// overflows, whatever the retry count.
    #[test]
    fn job_backoff_monotonic_and_saturating(
        base in 1u64..=10 * 60 * 1000,
        retries in 1u32..64,
    ) {
        let config = SchedulerConfig { retry_base_ms: base, ..Default::default() };
        let mut previous = 0u64;
        for retry in 0..retries {
            let backoff = config.failure_backoff_ms(retry);
            prop_assert!(backoff >= previous);
            previous = backoff;
        }
    }

    /// Jobs survive a JSON round trip with arbitrary ids and errors.
    #[test]
    fn job_serde_round_trip(
        store_id in "[a-zA-Z0-9_-]{1,40}",
        retry_count in 0u32..100,
        next_run_at in 0i64..2_000_000_000_000,
        last_error in proptest::option::of(".{0,200}"),
    ) {
        let mut job = SyncJob::new(store_id.clone(), SyncPriority::Medium, next_run_at);
        job.status = JobStatus::Failed;
        job.retry_count = retry_count;
        job.last_error = last_error.clone();

        let json = serde_json::to_string(&job).unwrap();
        let back: SyncJob = serde_json::from_str(&json).unwrap();

        prop_assert_eq!(back.store_id, store_id);
        prop_assert_eq!(back.retry_count, retry_count);
        prop_assert_eq!(back.next_run_at, next_run_at);
        prop_assert_eq!(back.status, JobStatus::Failed);
        prop_assert_eq!(back.last_error, last_error);
    }
}
