//! Queue statistics and point-in-time snapshots

use serde::{Deserialize, Serialize};

/// Cumulative counters since the queue was created
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks accepted by `push`
    pub enqueued: u64,
    /// Tasks that settled successfully
    pub completed: u64,
    /// Tasks that settled with a terminal failure
    pub failed: u64,
    /// Retry re-admissions scheduled
    pub retried: u64,
    /// Attempts that hit their deadline
    pub timed_out: u64,
}

/// Read-only view of the queue at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Tasks waiting for a slot
    pub size: usize,
    /// Tasks parked on a retry-delay timer
    pub delayed: usize,
    /// Tasks currently running
    pub in_flight: usize,
    pub paused: bool,
    pub concurrency: usize,
    pub stats: QueueStats,
}
