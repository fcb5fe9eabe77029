//! Retry decision and backoff math
//!
//! Pure functions: given an attempt count and a task's retry configuration,
//! decide retry/no-retry and compute the next delay.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::{RetryPredicate, TaskPolicy};
use crate::error::QueueError;
use crate::queue::task::TaskInfo;

/// Decide whether a failed attempt should be retried.
///
/// The attempt bound always applies: a task is retried strictly fewer times
/// than `max_retries`. Within that bound a caller-supplied predicate can
/// veto; a panicking predicate counts as "do not retry".
pub(crate) fn should_retry(error: &QueueError, info: &TaskInfo, predicate: Option<&RetryPredicate>) -> bool {
    let retries_so_far = info.attempts.saturating_sub(1);
    if retries_so_far >= info.max_retries {
        return false;
    }
    match predicate {
        Some(predicate) => catch_unwind(AssertUnwindSafe(|| predicate.evaluate(error, info))).unwrap_or_else(|_| {
            warn!(task_id = info.id, "retry predicate panicked; not retrying");
            false
        }),
        None => true,
    }
}

/// Compute the delay before the next attempt.
///
/// `delay = retry_delay_ms * backoff_factor^(attempts - 1)`, so the first
/// retry uses the base delay unmodified. A configured jitter ratio `j`
/// draws the final delay uniformly from `[delay*(1-j), delay*(1+j)]`,
/// floored at zero.
pub(crate) fn backoff_delay(policy: &TaskPolicy, attempts: u32) -> Duration {
    let base = policy.retry_delay_ms as f64;
    if base <= 0.0 {
        return Duration::ZERO;
    }

    let exponent = attempts.saturating_sub(1);
    let raw = base * policy.backoff_factor.powf(f64::from(exponent));
    if !raw.is_finite() {
        return Duration::from_millis(round_millis(raw));
    }

    let jittered = if policy.jitter > 0.0 {
        let spread = raw * policy.jitter;
        raw + rand::rng().random_range(-spread..=spread)
    } else {
        raw
    };

    Duration::from_millis(round_millis(jittered))
}

/// Rounded float-to-integer clamp. Negative and NaN collapse to zero,
/// overflow saturates.
fn round_millis(value: f64) -> u64 {
    if value.is_nan() {
        return 0;
    }
    let rounded = value.round();
    if rounded <= 0.0 {
        0
    } else if rounded >= u64::MAX as f64 {
        u64::MAX
    } else {
        rounded as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, TaskOptions};

    fn policy(retry_delay_ms: u64, backoff_factor: f64, jitter: f64) -> TaskPolicy {
        TaskOptions {
            retry_delay_ms: Some(retry_delay_ms),
            backoff_factor: Some(backoff_factor),
            jitter: Some(jitter),
            ..Default::default()
        }
        .resolve(&QueueConfig::default())
    }

    fn info(attempts: u32, max_retries: u32) -> TaskInfo {
        TaskInfo {
            id: 1,
            priority: 0,
            attempts,
            max_retries,
            metadata: None,
        }
    }

    #[test]
    fn test_exponential_backoff_is_exact_without_jitter() {
        let policy = policy(100, 2.0, 0.0);
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&policy, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(&policy, 4), Duration::from_millis(800));
    }

    #[test]
    fn test_zero_base_delay_is_zero() {
        let policy = policy(0, 8.0, 0.5);
        assert_eq!(backoff_delay(&policy, 1), Duration::ZERO);
        assert_eq!(backoff_delay(&policy, 5), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = policy(100, 1.0, 0.5);
        for _ in 0..200 {
            let delay = backoff_delay(&policy, 1);
            assert!(delay >= Duration::from_millis(50), "delay {delay:?} below spread");
            assert!(delay <= Duration::from_millis(150), "delay {delay:?} above spread");
        }
    }

    #[test]
    fn test_huge_backoff_saturates_instead_of_overflowing() {
        let policy = policy(u64::MAX, 1e300, 1.0);
        // must not panic or wrap negative
        let delay = backoff_delay(&policy, 10);
        assert!(delay >= Duration::from_millis(1));
    }

    #[test]
    fn test_round_millis_clamp() {
        assert_eq!(round_millis(-5.0), 0);
        assert_eq!(round_millis(f64::NAN), 0);
        assert_eq!(round_millis(99.5), 100);
        assert_eq!(round_millis(f64::INFINITY), u64::MAX);
    }

    #[test]
    fn test_retry_bound_respected() {
        let err = QueueError::Task(eyre::eyre!("boom"));
        assert!(!should_retry(&err, &info(1, 0), None));
        assert!(should_retry(&err, &info(1, 2), None));
        assert!(should_retry(&err, &info(2, 2), None));
        assert!(!should_retry(&err, &info(3, 2), None));
    }

    #[test]
    fn test_predicate_can_veto_within_bound() {
        let err = QueueError::Task(eyre::eyre!("fatal"));
        let veto = RetryPredicate::new(|_, _| false);
        assert!(!should_retry(&err, &info(1, 5), Some(&veto)));

        let allow = RetryPredicate::new(|_, _| true);
        assert!(should_retry(&err, &info(1, 5), Some(&allow)));
    }

    #[test]
    fn test_predicate_cannot_extend_bound() {
        let err = QueueError::Task(eyre::eyre!("boom"));
        let allow = RetryPredicate::new(|_, _| true);
        assert!(!should_retry(&err, &info(3, 2), Some(&allow)));
    }

    #[test]
    fn test_predicate_panic_means_no_retry() {
        let err = QueueError::Task(eyre::eyre!("boom"));
        let broken = RetryPredicate::new(|_, _| panic!("predicate bug"));
        assert!(!should_retry(&err, &info(1, 5), Some(&broken)));
    }

    #[test]
    fn test_predicate_sees_error_and_task_state() {
        let timeout = QueueError::Timeout { timeout_ms: 50 };
        let only_timeouts = RetryPredicate::new(|error, task| error.is_timeout() && task.attempts < 3);
        assert!(should_retry(&timeout, &info(1, 5), Some(&only_timeouts)));
        assert!(!should_retry(&timeout, &info(3, 5), Some(&only_timeouts)));

        let app = QueueError::Task(eyre::eyre!("bad request"));
        assert!(!should_retry(&app, &info(1, 5), Some(&only_timeouts)));
    }
}
