//! taskq - concurrency-bounded async task queue
//!
//! One queue instance per logical owner (e.g. per external session)
//! serializes and throttles that owner's outbound work: it governs how
//! many tasks run at once, retries transient failures with exponential
//! backoff and jitter, enforces per-task deadlines with cooperative
//! cancellation, and orders admission by priority with FIFO tie-break.
//! The queue schedules opaque async functions; it knows nothing about the
//! work it runs.
//!
//! # Core Concepts
//!
//! - **Bounded concurrency**: at most `concurrency` tasks run at once;
//!   admission checks are atomic, so the limit is never jointly exceeded
//! - **Priority + FIFO**: higher priority wins the next free slot; equal
//!   priorities start in strict enqueue order
//! - **Retries are invisible**: each `push` resolves exactly once;
//!   intermediate attempts surface only on the event stream
//! - **Cooperative cancellation**: a timed-out task is signalled, never
//!   force-killed; non-cooperative work may keep running in the background
//!
//! # Modules
//!
//! - [`queue`] - admission, draining, retry re-submission, idle detection
//! - [`config`] - queue defaults and per-task options
//! - [`events`] - lifecycle event stream for external monitoring
//! - [`error`] - the queue error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use taskq::{QueueConfig, TaskOptions, TaskQueue};
//!
//! # async fn demo() -> Result<(), taskq::QueueError> {
//! let queue: TaskQueue<String> = TaskQueue::new(QueueConfig {
//!     concurrency: 2,
//!     max_retries: 3,
//!     retry_delay_ms: 100,
//!     backoff_factor: 2.0,
//!     ..Default::default()
//! });
//!
//! let handle = queue.push(
//!     |ctx| async move {
//!         if ctx.cancellation.is_cancelled() {
//!             return Err(eyre::eyre!("cancelled"));
//!         }
//!         Ok(format!("sent on attempt {}", ctx.attempt))
//!     },
//!     TaskOptions::default(),
//! )?;
//!
//! let result = handle.await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod queue;

pub use config::{QueueConfig, RetryPredicate, TaskOptions};
pub use error::QueueError;
pub use events::{EventLogEntry, QueueEvent};
pub use queue::{QueueSnapshot, QueueStats, TaskContext, TaskHandle, TaskInfo, TaskQueue};
