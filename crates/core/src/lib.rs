//! Main thread work dispatcher
//!
//! Lets background threads and async tasks schedule work onto a single
//! designated main thread that owns state unsafe to touch from anywhere else.
//!
//! - [`tasks`] - The dispatcher, producer handles and awaitable completions
//! - [`coroutines`] - Step scheduler continuing suspendable work across ticks
//! - [`frame`] - Per-tick driver the host calls from its main loop
//! - [`palette`] - Broadcast color source with main-thread repaint bindings
//! - [`config`] - TOML configuration
//!
//! # Example
//!
//! ```ignore
//! use mainthread_core::{DispatchError, DispatcherConfig, FrameFlags, FrameLoop};
//!
//! let mut frames = FrameLoop::new(&DispatcherConfig::default())?;
//! let handle = frames.handle();
//!
//! std::thread::spawn(move || -> Result<(), DispatchError> {
//!     let answer = handle.enqueue_and_await(|| 6 * 7)?.wait();
//!     assert_eq!(answer, Ok(42));
//!     Ok(())
//! });
//!
//! loop {
//!     frames.run_frame(FrameFlags::SIMULATING)?;
//! }
//! ```

pub mod config;
pub mod coroutines;
pub mod error;
pub mod frame;
pub mod palette;
pub mod tasks;

// Re-export commonly used items
pub use config::{ConfigError, ConfigResult, DispatcherConfig};
pub use coroutines::{Coroutine, CoroutineKey, Sequence, Step, StepContext, StepScheduler};
pub use error::{BoxError, DispatchError, DispatchResult, FailureHandler, ItemFailure};
pub use frame::{FrameFlags, FrameInfo, FrameKey, FrameLoop};
pub use palette::{Color, ColorBinding, ColorTarget, Opacity, Palette};
pub use tasks::{
    Completion, DispatchHandle, Dispatcher, DrainReport, TaskError, TaskResult, WorkItem,
};
