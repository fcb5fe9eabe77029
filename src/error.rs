//! Queue error types

use thiserror::Error;

/// Errors surfaced by the queue itself, plus the pass-through variant for
/// application errors raised by the work being scheduled.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Admission rejected: the pending queue is at its configured bound
    #[error("queue limit reached")]
    Full,

    /// The task was rejected in bulk by `clear()`
    #[error("queue cleared")]
    Cleared,

    /// The task was rejected because the queue was destroyed
    #[error("queue destroyed")]
    Destroyed,

    /// The task's deadline elapsed before it settled
    #[error("task timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The task's own error, passed through unchanged
    #[error(transparent)]
    Task(#[from] eyre::Report),
}

impl QueueError {
    /// Stable machine-readable code for logs and event consumers
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Full => "QUEUE_FULL",
            QueueError::Cleared => "QUEUE_CLEARED",
            QueueError::Destroyed => "QUEUE_DESTROYED",
            QueueError::Timeout { .. } => "QUEUE_TIMEOUT",
            QueueError::Task(_) => "TASK_ERROR",
        }
    }

    /// Check if this is a deadline failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, QueueError::Timeout { .. })
    }

    /// Get the configured timeout if this is a deadline failure
    pub fn timeout_ms(&self) -> Option<u64> {
        match self {
            QueueError::Timeout { timeout_ms } => Some(*timeout_ms),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(QueueError::Full.code(), "QUEUE_FULL");
        assert_eq!(QueueError::Cleared.code(), "QUEUE_CLEARED");
        assert_eq!(QueueError::Destroyed.code(), "QUEUE_DESTROYED");
        assert_eq!(QueueError::Timeout { timeout_ms: 50 }.code(), "QUEUE_TIMEOUT");
        assert_eq!(QueueError::Task(eyre::eyre!("boom")).code(), "TASK_ERROR");
    }

    #[test]
    fn test_timeout_helpers() {
        let err = QueueError::Timeout { timeout_ms: 250 };
        assert!(err.is_timeout());
        assert_eq!(err.timeout_ms(), Some(250));
        assert!(err.to_string().contains("250 ms"));

        let err = QueueError::Full;
        assert!(!err.is_timeout());
        assert_eq!(err.timeout_ms(), None);
    }

    #[test]
    fn test_task_error_passthrough() {
        let err = QueueError::Task(eyre::eyre!("send failed: connection reset"));
        assert_eq!(err.to_string(), "send failed: connection reset");
    }
}
