//! TaskQueue implementation
//!
//! Admission, priority draining, retry re-submission, pause/resume, and
//! idle detection. One queue per logical owner; the queue never inspects
//! the work it runs.

use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use eyre::Report;
use tokio::sync::{broadcast, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{QueueConfig, TaskOptions};
use crate::error::QueueError;
use crate::events::QueueEvent;
use crate::queue::retry;
use crate::queue::state::{QueueSnapshot, QueueStats};
use crate::queue::task::{PendingTask, TaskCell, TaskContext, TaskHandle, TaskInfo, WorkFn};

/// Buffered events per subscriber; a slow subscriber loses the oldest
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A task parked on its retry-delay timer
struct DelayedRetry<T> {
    cell: TaskCell<T>,
    timer: JoinHandle<()>,
}

/// Internal state protected by the mutex.
///
/// Admission checks and their mutations happen inside one critical section,
/// so concurrent drains can never jointly exceed the concurrency limit. The
/// lock is never held across an await or a call into user code.
struct Inner<T> {
    pending: BinaryHeap<PendingTask<T>>,
    delayed: HashMap<u64, DelayedRetry<T>>,
    active: usize,
    concurrency: usize,
    paused: bool,
    destroyed: bool,
    next_seq: u64,
    stats: QueueStats,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

impl<T> Inner<T> {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.delayed.is_empty() && self.active == 0
    }

    fn notify_if_idle(&mut self) {
        if !self.is_idle() || self.idle_waiters.is_empty() {
            return;
        }
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}

struct Shared<T> {
    defaults: QueueConfig,
    events: broadcast::Sender<QueueEvent>,
    inner: Mutex<Inner<T>>,
}

#[derive(Clone, Copy)]
enum RejectKind {
    Cleared,
    Destroyed,
}

impl RejectKind {
    fn error(self) -> QueueError {
        match self {
            RejectKind::Cleared => QueueError::Cleared,
            RejectKind::Destroyed => QueueError::Destroyed,
        }
    }
}

/// Concurrency-bounded task queue with priority admission, automatic
/// retries, and cooperative per-task timeouts.
///
/// Cloning is cheap and clones share state. Methods must be called from
/// within a Tokio runtime: started tasks and retry timers are spawned onto
/// the ambient runtime.
pub struct TaskQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> TaskQueue<T> {
    /// Create a new queue. Invalid config values are clamped to defaults;
    /// construction never fails.
    pub fn new(config: QueueConfig) -> Self {
        let config = config.normalized();
        debug!(
            concurrency = config.concurrency,
            auto_start = config.auto_start,
            "TaskQueue::new"
        );
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let paused = !config.auto_start;
        let concurrency = config.concurrency;
        Self {
            shared: Arc::new(Shared {
                defaults: config,
                events,
                inner: Mutex::new(Inner {
                    pending: BinaryHeap::new(),
                    delayed: HashMap::new(),
                    active: 0,
                    concurrency,
                    paused,
                    destroyed: false,
                    next_seq: 0,
                    stats: QueueStats::default(),
                    idle_waiters: Vec::new(),
                }),
            }),
        }
    }

    /// Submit a unit of work.
    ///
    /// The function may be invoked once per attempt; each invocation gets a
    /// fresh [`TaskContext`]. Rejects synchronously, before any state
    /// mutation, with [`QueueError::Full`] when the pending queue is at its
    /// bound, or [`QueueError::Destroyed`] after `destroy()`. The returned
    /// handle resolves exactly once.
    pub fn push<F, Fut>(&self, work: F, opts: TaskOptions) -> Result<TaskHandle<T>, QueueError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Report>> + Send + 'static,
    {
        let work: WorkFn<T> = Arc::new(move |ctx| Box::pin(work(ctx)));
        let policy = opts.resolve(&self.shared.defaults);

        let (event, handle, start_drain) = {
            let mut inner = self.lock();
            if inner.destroyed {
                return Err(QueueError::Destroyed);
            }
            if let Some(limit) = self.shared.defaults.max_queue_size {
                if inner.pending.len() >= limit {
                    return Err(QueueError::Full);
                }
            }

            let seq = inner.bump_seq();
            let (tx, rx) = oneshot::channel();
            let cell = TaskCell::new(seq, policy, work, tx);
            let info = cell.info();
            inner.pending.push(PendingTask { seq, cell });
            inner.stats.enqueued += 1;
            debug!(task_id = seq, pending = inner.pending.len(), "TaskQueue::push: admitted");

            (
                QueueEvent::Enqueued {
                    pending: inner.pending.len(),
                    task: info,
                },
                TaskHandle::new(seq, rx),
                !inner.paused,
            )
        };

        self.emit(event);
        if start_drain {
            self.drain();
        }
        Ok(handle)
    }

    /// Stop admitting new tasks; in-flight tasks run to completion
    pub fn pause(&self, reason: &str) {
        {
            let mut inner = self.lock();
            if inner.paused {
                return;
            }
            inner.paused = true;
        }
        debug!(reason, "TaskQueue::pause");
        self.emit(QueueEvent::Paused {
            reason: reason.to_string(),
        });
    }

    /// Restart draining after a pause
    pub fn resume(&self) {
        {
            let mut inner = self.lock();
            if !inner.paused {
                return;
            }
            inner.paused = false;
        }
        debug!("TaskQueue::resume");
        self.emit(QueueEvent::Resumed);
        self.drain();
    }

    /// Change the concurrency limit immediately. An increase drains waiting
    /// work; a decrease only throttles future admissions and never
    /// interrupts running tasks. Zero is invalid and keeps the current
    /// limit.
    pub fn set_concurrency(&self, limit: usize) {
        if limit == 0 {
            warn!("TaskQueue::set_concurrency: ignoring zero limit");
            return;
        }
        {
            let mut inner = self.lock();
            if inner.concurrency == limit {
                return;
            }
            inner.concurrency = limit;
        }
        debug!(limit, "TaskQueue::set_concurrency");
        self.emit(QueueEvent::ConcurrencyChanged { limit });
        self.drain();
    }

    /// Reject every pending task (including tasks parked on a retry-delay
    /// timer) with [`QueueError::Cleared`] and cancel their timers. Running
    /// tasks are unaffected.
    pub fn clear(&self) {
        self.clear_with(RejectKind::Cleared);
    }

    /// Pause, clear, and permanently refuse further pushes. Already-running
    /// tasks finish naturally.
    pub fn destroy(&self) {
        self.pause("destroyed");
        {
            let mut inner = self.lock();
            inner.destroyed = true;
        }
        self.clear_with(RejectKind::Destroyed);
    }

    /// Wait until nothing is pending, delayed, or running. All concurrent
    /// waiters resolve together at the same idle transition.
    pub async fn on_idle(&self) {
        let rx = {
            let mut inner = self.lock();
            if inner.is_idle() {
                return;
            }
            let (tx, rx) = oneshot::channel();
            inner.idle_waiters.push(tx);
            rx
        };
        let _ = rx.await;
    }

    /// Subscribe to lifecycle events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    /// Read-only view of the queue at this instant
    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.lock();
        QueueSnapshot {
            size: inner.pending.len(),
            delayed: inner.delayed.len(),
            in_flight: inner.active,
            paused: inner.paused,
            concurrency: inner.concurrency,
            stats: inner.stats.clone(),
        }
    }

    /// Number of tasks waiting for a slot
    pub fn size(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of tasks currently running
    pub fn in_flight(&self) -> usize {
        self.lock().active
    }

    /// True when nothing is pending, delayed, or running
    pub fn idle(&self) -> bool {
        self.lock().is_idle()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn concurrency(&self) -> usize {
        self.lock().concurrency
    }

    // === internals ===

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: QueueEvent) {
        debug!(event_type = event.event_type(), "TaskQueue: emit");
        let _ = self.shared.events.send(event);
    }

    /// Start as many pending tasks as capacity allows
    fn drain(&self) {
        let mut to_start = Vec::new();
        {
            let mut inner = self.lock();
            if inner.destroyed || inner.paused {
                return;
            }
            while inner.active < inner.concurrency {
                let Some(next) = inner.pending.pop() else { break };
                inner.active += 1;
                to_start.push(next.cell);
            }
            inner.notify_if_idle();
        }
        for cell in to_start {
            let queue = self.clone();
            tokio::spawn(async move { queue.run_task(cell).await });
        }
    }

    /// Execute one attempt under the task's timeout, then settle or retry
    async fn run_task(self, mut cell: TaskCell<T>) {
        cell.attempts += 1;
        let info = cell.info();
        debug!(task_id = info.id, attempt = info.attempts, "TaskQueue::run_task: starting");
        self.emit(QueueEvent::Started { task: info.clone() });

        let cancellation = CancellationToken::new();
        let ctx = TaskContext {
            attempt: cell.attempts,
            cancellation: cancellation.clone(),
            metadata: cell.policy.metadata.clone(),
        };
        let work = Arc::clone(&cell.work);
        // The invocation runs as its own task so that a timed-out attempt
        // can keep running in the background; cancellation is cooperative
        // only and the queue never force-kills work.
        let mut invocation = tokio::spawn(async move { (work)(ctx).await });

        let timeout_ms = cell.policy.timeout_ms;
        let outcome: Result<T, QueueError> = if timeout_ms > 0 {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut invocation).await {
                Ok(joined) => flatten_join(joined),
                Err(_) => {
                    cancellation.cancel();
                    warn!(task_id = info.id, timeout_ms, "TaskQueue::run_task: deadline elapsed");
                    self.lock().stats.timed_out += 1;
                    Err(QueueError::Timeout { timeout_ms })
                }
            }
        } else {
            flatten_join(invocation.await)
        };

        match outcome {
            Ok(value) => {
                self.lock().stats.completed += 1;
                cell.settle(Ok(value));
                self.emit(QueueEvent::Succeeded { task: info.clone() });
            }
            Err(error) => self.handle_failure(cell, error),
        }

        self.finish_attempt(info);
    }

    fn handle_failure(&self, cell: TaskCell<T>, error: QueueError) {
        let info = cell.info();
        if retry::should_retry(&error, &info, cell.policy.should_retry.as_ref()) {
            let delay = retry::backoff_delay(&cell.policy, cell.attempts);
            debug!(task_id = info.id, delay_ms = delay.as_millis() as u64, "TaskQueue: retrying");
            if self.schedule_retry(cell, delay) {
                self.lock().stats.retried += 1;
                self.emit(QueueEvent::Retrying {
                    task: info,
                    delay_ms: delay.as_millis() as u64,
                    error: error.to_string(),
                });
            }
        } else {
            self.lock().stats.failed += 1;
            self.emit(QueueEvent::Failed {
                error: error.to_string(),
                task: info,
            });
            cell.settle(Err(error));
        }
    }

    /// Re-admit a failed task. A zero delay goes straight back through the
    /// pending queue (picked up by the next drain tick, never re-entrantly);
    /// otherwise the task parks on a timer that `clear`/`destroy` cancel.
    /// Returns false if the queue was destroyed while the attempt ran.
    fn schedule_retry(&self, cell: TaskCell<T>, delay: Duration) -> bool {
        let mut inner = self.lock();
        if inner.destroyed {
            drop(inner);
            cell.settle(Err(QueueError::Destroyed));
            return false;
        }

        if delay.is_zero() {
            let seq = inner.bump_seq();
            inner.pending.push(PendingTask { seq, cell });
            return true;
        }

        let id = cell.id;
        let queue = self.clone();
        // The timer cannot fire before the entry is inserted: re-admission
        // needs the lock we are holding.
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.readmit_delayed(id);
        });
        inner.delayed.insert(id, DelayedRetry { cell, timer });
        true
    }

    fn readmit_delayed(&self, id: u64) {
        let readmitted = {
            let mut inner = self.lock();
            match inner.delayed.remove(&id) {
                Some(entry) => {
                    let seq = inner.bump_seq();
                    debug!(task_id = id, "TaskQueue: retry delay elapsed, re-admitting");
                    inner.pending.push(PendingTask { seq, cell: entry.cell });
                    true
                }
                None => false,
            }
        };
        if readmitted {
            self.drain();
        }
    }

    fn finish_attempt(&self, info: TaskInfo) {
        {
            let mut inner = self.lock();
            inner.active -= 1;
            inner.notify_if_idle();
        }
        self.emit(QueueEvent::Settled { task: info });
        self.drain();
    }

    fn clear_with(&self, kind: RejectKind) {
        let mut rejected = Vec::new();
        {
            let mut inner = self.lock();
            while let Some(entry) = inner.pending.pop() {
                rejected.push(entry.cell);
            }
            for (_, delayed) in inner.delayed.drain() {
                delayed.timer.abort();
                rejected.push(delayed.cell);
            }
            inner.notify_if_idle();
        }
        debug!(rejected = rejected.len(), code = kind.error().code(), "TaskQueue::clear");
        for cell in rejected {
            cell.settle(Err(kind.error()));
        }
        self.emit(QueueEvent::Cleared {
            error: kind.error().to_string(),
        });
    }
}

fn flatten_join<T>(joined: Result<Result<T, Report>, JoinError>) -> Result<T, QueueError> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(report)) => Err(QueueError::Task(report)),
        Err(join_error) => Err(QueueError::Task(eyre::eyre!("task panicked: {join_error}"))),
    }
}
