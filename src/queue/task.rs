//! Task types for the queue
//!
//! A task is created on push and moves *pending -> running -> settled*, or
//! back to pending after a retry delay. The caller holds a [`TaskHandle`]
//! that resolves exactly once; the queue holds the [`TaskCell`].

use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use eyre::Report;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::TaskPolicy;
use crate::error::QueueError;

/// Everything a unit of work receives when it is invoked
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// 1-based attempt number
    pub attempt: u32,

    /// Cooperative cancellation signal; the work must poll or select against
    /// it to actually stop
    pub cancellation: CancellationToken,

    /// Opaque caller-supplied metadata
    pub metadata: Option<Value>,
}

/// Read-only task descriptor carried by events and retry predicates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: u64,
    pub priority: i32,
    pub attempts: u32,
    pub max_retries: u32,
    pub metadata: Option<Value>,
}

pub(crate) type WorkFn<T> = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, Result<T, Report>> + Send + Sync>;

/// An admitted unit of work owned by the queue
pub(crate) struct TaskCell<T> {
    /// Stable identity, assigned at first admission
    pub id: u64,
    pub attempts: u32,
    pub policy: TaskPolicy,
    pub work: WorkFn<T>,
    reply: oneshot::Sender<Result<T, QueueError>>,
}

impl<T> TaskCell<T> {
    pub fn new(id: u64, policy: TaskPolicy, work: WorkFn<T>, reply: oneshot::Sender<Result<T, QueueError>>) -> Self {
        Self {
            id,
            attempts: 0,
            policy,
            work,
            reply,
        }
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            priority: self.policy.priority,
            attempts: self.attempts,
            max_retries: self.policy.max_retries,
            metadata: self.policy.metadata.clone(),
        }
    }

    /// Resolve the caller's handle. The handle may already be dropped; that
    /// is not an error.
    pub fn settle(self, outcome: Result<T, QueueError>) {
        let _ = self.reply.send(outcome);
    }
}

/// Heap entry: a task plus its admission sequence number.
///
/// The sequence number is reassigned on every (re)admission, so a retried
/// task keeps its identity and configuration but loses its queue position.
pub(crate) struct PendingTask<T> {
    pub seq: u64,
    pub cell: TaskCell<T>,
}

impl<T> PartialEq for PendingTask<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cell.policy.priority == other.cell.policy.priority && self.seq == other.seq
    }
}

impl<T> Eq for PendingTask<T> {}

impl<T> Ord for PendingTask<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier admission
        self.cell
            .policy
            .priority
            .cmp(&other.cell.policy.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for PendingTask<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Caller-facing outcome handle returned by `push`.
///
/// Resolves exactly once: the task's result, its terminal error, or the
/// bulk-rejection error from `clear`/`destroy`. Intermediate retries are
/// invisible here.
pub struct TaskHandle<T> {
    id: u64,
    rx: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: u64, rx: oneshot::Receiver<Result<T, QueueError>>) -> Self {
        Self { id, rx }
    }

    /// Stable id of the admitted task
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, QueueError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|received| match received {
            Ok(outcome) => outcome,
            // Sender dropped without settling: only possible once the queue
            // itself is gone
            Err(_) => Err(QueueError::Destroyed),
        })
    }
}
