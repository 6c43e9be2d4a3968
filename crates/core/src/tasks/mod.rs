//! Main thread work dispatch
//!
//! Allows background threads to queue work to execute on the main thread.
//! The queue is drained once per tick by the frame loop.

pub mod completion;
pub mod queue;
pub mod work;

pub use completion::{Completion, TaskError, TaskResult};
pub use queue::{DispatchHandle, Dispatcher, DrainReport};
pub use work::{Task, WorkItem};
