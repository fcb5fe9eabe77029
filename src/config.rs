//! Queue configuration and per-task options
//!
//! Every queue takes an explicit [`QueueConfig`] value; there is no global
//! state. Invalid numeric values never fail construction; they fall back to
//! their documented defaults, so a queue built from untrusted configuration
//! always comes up usable.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueueError;
use crate::queue::TaskInfo;

/// Caller-supplied retry decision, consulted after the attempt bound check.
///
/// The predicate receives the failure and a read-only view of the task. A
/// predicate that panics counts as "do not retry".
#[derive(Clone)]
pub struct RetryPredicate(Arc<dyn Fn(&QueueError, &TaskInfo) -> bool + Send + Sync>);

impl RetryPredicate {
    pub fn new(predicate: impl Fn(&QueueError, &TaskInfo) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    pub(crate) fn evaluate(&self, error: &QueueError, info: &TaskInfo) -> bool {
        (self.0)(error, info)
    }
}

impl fmt::Debug for RetryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryPredicate")
    }
}

/// Queue-level defaults applied to every task that does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Start draining as soon as work is pushed; false = created paused
    pub auto_start: bool,

    /// Max tasks running at once (>= 1)
    pub concurrency: usize,

    /// Max pending tasks before `push` rejects; None = unbounded
    pub max_queue_size: Option<usize>,

    /// Per-task deadline in milliseconds; 0 = disabled
    pub timeout_ms: u64,

    /// Max retries after the first attempt
    pub max_retries: u32,

    /// Base delay before the first retry
    pub retry_delay_ms: u64,

    /// Multiplier applied to the delay on each successive retry (>= 1.0)
    pub backoff_factor: f64,

    /// Jitter ratio in [0, 1] applied to the computed delay
    pub jitter: f64,

    /// Baseline priority for tasks that do not set one; higher runs first
    pub priority: i32,

    /// Queue-level retry predicate; per-task predicates take precedence
    #[serde(skip)]
    pub should_retry: Option<RetryPredicate>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            concurrency: 1,
            max_queue_size: None,
            timeout_ms: 0,
            max_retries: 0,
            retry_delay_ms: 0,
            backoff_factor: 1.0,
            jitter: 0.0,
            priority: 0,
            should_retry: None,
        }
    }
}

impl QueueConfig {
    /// Clamp every out-of-range value to its default. Never fails.
    pub fn normalized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        self.max_queue_size = self.max_queue_size.filter(|&limit| limit > 0);
        self.backoff_factor = clamp_factor(self.backoff_factor);
        self.jitter = clamp_ratio(self.jitter);
        self
    }
}

/// Per-push overrides, scoped to one task
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub priority: Option<i32>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub jitter: Option<f64>,
    pub should_retry: Option<RetryPredicate>,
    pub metadata: Option<Value>,
}

impl TaskOptions {
    pub(crate) fn resolve(self, defaults: &QueueConfig) -> TaskPolicy {
        TaskPolicy {
            priority: self.priority.unwrap_or(defaults.priority),
            timeout_ms: self.timeout_ms.unwrap_or(defaults.timeout_ms),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_delay_ms: self.retry_delay_ms.unwrap_or(defaults.retry_delay_ms),
            backoff_factor: resolve_factor(self.backoff_factor, clamp_factor(defaults.backoff_factor)),
            jitter: resolve_ratio(self.jitter, clamp_ratio(defaults.jitter)),
            should_retry: self.should_retry.or_else(|| defaults.should_retry.clone()),
            metadata: self.metadata,
        }
    }
}

/// Fully resolved configuration carried by a single task
#[derive(Debug, Clone)]
pub(crate) struct TaskPolicy {
    pub priority: i32,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: f64,
    pub should_retry: Option<RetryPredicate>,
    pub metadata: Option<Value>,
}

fn clamp_factor(value: f64) -> f64 {
    if !value.is_finite() || value < 1.0 { 1.0 } else { value }
}

fn clamp_ratio(value: f64) -> f64 {
    if !value.is_finite() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// An invalid override falls back to the queue-level value, not the hard default
fn resolve_factor(value: Option<f64>, fallback: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() && v >= 1.0 => v,
        _ => fallback,
    }
}

fn resolve_ratio(value: Option<f64>, fallback: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert!(config.auto_start);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_queue_size, None);
        assert_eq!(config.timeout_ms, 0);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.retry_delay_ms, 0);
        assert_eq!(config.backoff_factor, 1.0);
        assert_eq!(config.jitter, 0.0);
        assert_eq!(config.priority, 0);
    }

    #[test]
    fn test_normalized_clamps_invalid_values() {
        let config = QueueConfig {
            concurrency: 0,
            max_queue_size: Some(0),
            backoff_factor: f64::NAN,
            jitter: 3.0,
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_queue_size, None);
        assert_eq!(config.backoff_factor, 1.0);
        assert_eq!(config.jitter, 1.0);
    }

    #[test]
    fn test_normalized_keeps_valid_values() {
        let config = QueueConfig {
            concurrency: 4,
            max_queue_size: Some(100),
            backoff_factor: 2.5,
            jitter: 0.3,
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_queue_size, Some(100));
        assert_eq!(config.backoff_factor, 2.5);
        assert_eq!(config.jitter, 0.3);
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: QueueConfig = serde_json::from_str(r#"{"concurrency": 3, "timeout_ms": 5000}"#).unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.max_retries, 0);
        assert!(config.auto_start);
    }

    #[test]
    fn test_options_fall_back_to_queue_defaults() {
        let defaults = QueueConfig {
            timeout_ms: 1000,
            max_retries: 3,
            priority: 5,
            ..Default::default()
        };

        let policy = TaskOptions::default().resolve(&defaults);
        assert_eq!(policy.timeout_ms, 1000);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.priority, 5);
        assert!(policy.metadata.is_none());
    }

    #[test]
    fn test_options_override_queue_defaults() {
        let defaults = QueueConfig {
            max_retries: 3,
            jitter: 0.5,
            ..Default::default()
        };

        let opts = TaskOptions {
            priority: Some(-2),
            max_retries: Some(0),
            jitter: Some(f64::INFINITY),
            metadata: Some(serde_json::json!({"session": "abc"})),
            ..Default::default()
        };

        let policy = opts.resolve(&defaults);
        assert_eq!(policy.priority, -2);
        assert_eq!(policy.max_retries, 0);
        // invalid override falls back to the queue-level value
        assert_eq!(policy.jitter, 0.5);
        assert_eq!(policy.metadata.unwrap()["session"], "abc");
    }

    #[test]
    fn test_queue_level_predicate_inherited() {
        let defaults = QueueConfig {
            should_retry: Some(RetryPredicate::new(|_, _| false)),
            ..Default::default()
        };

        let policy = TaskOptions::default().resolve(&defaults);
        assert!(policy.should_retry.is_some());
    }
}
