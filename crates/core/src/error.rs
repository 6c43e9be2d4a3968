//! Error types for dispatching and executing main-thread work

use std::any::Any;
use std::sync::Arc;
use std::thread::ThreadId;

/// Boxed error returned by fallible work items
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned to producers and to the main loop
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// No live dispatcher is bound to the handle (before activation or after shutdown)
    #[error("Dispatcher not initialized")]
    NotInitialized,

    /// A dispatcher is already bound to the handle, or single-instance mode
    /// already has a live dispatcher in this process
    #[error("Dispatcher already active")]
    AlreadyActive,

    /// A main-thread-only operation was called from another thread
    #[error("Called from thread {actual:?}, main thread is {expected:?}")]
    WrongThread {
        expected: ThreadId,
        actual: ThreadId,
    },

    /// The pending queue reached its configured capacity
    #[error("Dispatch queue full (capacity {capacity})")]
    QueueFull { capacity: usize },
}

/// Result type for dispatcher operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Failure of a work item body during drain or a coroutine step
#[derive(Debug, thiserror::Error)]
pub enum ItemFailure {
    /// The item returned an error
    #[error("Work item failed: {0}")]
    Error(BoxError),

    /// The item panicked
    #[error("Work item panicked: {0}")]
    Panic(String),
}

impl ItemFailure {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panic(panic_message(payload.as_ref()))
    }
}

/// Receives failures nobody else observes
///
/// Fire-and-forget items, coroutine steps and awaitables whose handle was
/// dropped all report here.
pub type FailureHandler = Arc<dyn Fn(&ItemFailure) + Send + Sync>;

/// Handler that logs every unhandled failure
pub fn log_failure_handler() -> FailureHandler {
    Arc::new(|failure| {
        tracing::error!("Unhandled main-thread failure: {}", failure);
    })
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
