//! Queue lifecycle events
//!
//! Every significant queue action emits an event on a broadcast channel.
//! Emission is fire-and-forget: with no subscribers the event is dropped,
//! and a slow subscriber loses the oldest events rather than blocking the
//! queue. Each event carries enough state for a consumer to reconstruct
//! queue status without touching queue internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::TaskInfo;

/// The vocabulary of queue activity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueEvent {
    /// A task was accepted; `pending` is the resulting queue length
    Enqueued { pending: usize, task: TaskInfo },
    /// An attempt started
    Started { task: TaskInfo },
    /// The task settled with a result
    Succeeded { task: TaskInfo },
    /// The task settled with a terminal failure
    Failed { error: String, task: TaskInfo },
    /// A failed attempt will be re-admitted after `delay_ms`
    Retrying { task: TaskInfo, delay_ms: u64, error: String },
    /// An attempt finished, regardless of outcome
    Settled { task: TaskInfo },
    /// Pending tasks were bulk-rejected
    Cleared { error: String },
    Paused { reason: String },
    Resumed,
    ConcurrencyChanged { limit: usize },
}

impl QueueEvent {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::Enqueued { .. } => "Enqueued",
            QueueEvent::Started { .. } => "Started",
            QueueEvent::Succeeded { .. } => "Succeeded",
            QueueEvent::Failed { .. } => "Failed",
            QueueEvent::Retrying { .. } => "Retrying",
            QueueEvent::Settled { .. } => "Settled",
            QueueEvent::Cleared { .. } => "Cleared",
            QueueEvent::Paused { .. } => "Paused",
            QueueEvent::Resumed => "Resumed",
            QueueEvent::ConcurrencyChanged { .. } => "ConcurrencyChanged",
        }
    }

    /// Get the task id, for events that concern a single task
    pub fn task_id(&self) -> Option<u64> {
        match self {
            QueueEvent::Enqueued { task, .. }
            | QueueEvent::Started { task }
            | QueueEvent::Succeeded { task }
            | QueueEvent::Failed { task, .. }
            | QueueEvent::Retrying { task, .. }
            | QueueEvent::Settled { task } => Some(task.id),
            QueueEvent::Cleared { .. }
            | QueueEvent::Paused { .. }
            | QueueEvent::Resumed
            | QueueEvent::ConcurrencyChanged { .. } => None,
        }
    }
}

/// A timestamped event for file or log persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: QueueEvent,
}

impl EventLogEntry {
    /// Create a new log entry with the current timestamp
    pub fn new(event: QueueEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_info(id: u64) -> TaskInfo {
        TaskInfo {
            id,
            priority: 0,
            attempts: 1,
            max_retries: 0,
            metadata: None,
        }
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(QueueEvent::Resumed.event_type(), "Resumed");
        assert_eq!(
            QueueEvent::Enqueued {
                pending: 1,
                task: task_info(1)
            }
            .event_type(),
            "Enqueued"
        );
        assert_eq!(
            QueueEvent::Retrying {
                task: task_info(1),
                delay_ms: 100,
                error: "boom".to_string()
            }
            .event_type(),
            "Retrying"
        );
    }

    #[test]
    fn test_task_id_accessor() {
        let event = QueueEvent::Started { task: task_info(9) };
        assert_eq!(event.task_id(), Some(9));

        let event = QueueEvent::Paused {
            reason: "manual".to_string(),
        };
        assert_eq!(event.task_id(), None);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = QueueEvent::Failed {
            error: "send failed".to_string(),
            task: task_info(3),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Failed\""));

        let parsed: QueueEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "Failed");
        assert_eq!(parsed.task_id(), Some(3));
    }

    #[test]
    fn test_event_log_entry_roundtrip() {
        let entry = EventLogEntry::new(QueueEvent::ConcurrencyChanged { limit: 8 });

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("ts"));

        let parsed: EventLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event.event_type(), "ConcurrencyChanged");
    }
}
