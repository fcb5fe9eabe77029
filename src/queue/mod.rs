//! Task queue: admission, draining, retry, timeout
//!
//! The queue is the only component the outside world talks to. A caller
//! pushes a function with options; whenever capacity allows, the queue
//! starts the highest-priority pending task under its timeout; on failure
//! the retry policy decides between re-admission and a terminal rejection.

mod core;
mod retry;
mod state;
mod task;

pub use self::core::TaskQueue;
pub use self::state::{QueueSnapshot, QueueStats};
pub use self::task::{TaskContext, TaskHandle, TaskInfo};
