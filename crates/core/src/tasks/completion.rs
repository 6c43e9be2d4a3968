//! Completion handles for awaitable main-thread work
//!
//! A completion is split in two: the [`Completion`] handed back to the
//! producer, and a resolver that travels inside the work item and is
//! consumed on the main thread. The resolver delivers exactly one outcome.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Failure outcome of an awaitable work item
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError<E = Infallible> {
    /// The callable returned this error
    #[error("Task failed: {0}")]
    Failed(E),

    /// The callable panicked on the main thread
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The item was dropped without running (dispatcher shut down)
    #[error("Task abandoned before it ran")]
    Abandoned,

    /// A blocking wait was attempted on the main thread itself
    #[error("Blocking wait on the main thread would never resolve")]
    WouldBlockMainThread,
}

/// Outcome delivered through a completion
pub type TaskResult<T, E = Infallible> = Result<T, TaskError<E>>;

enum State<T, E> {
    Pending { waker: Option<Waker> },
    Ready(TaskResult<T, E>),
    /// Outcome already handed to the awaiting side
    Taken,
    /// Awaiting side dropped before resolution
    Detached,
}

struct Shared<T, E> {
    state: Mutex<State<T, E>>,
    resolved: Condvar,
}

/// Create a linked resolver/completion pair
pub(crate) fn pending<T, E>(main_thread: Option<ThreadId>) -> (Resolver<T, E>, Completion<T, E>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending { waker: None }),
        resolved: Condvar::new(),
    });

    (
        Resolver {
            shared: Some(shared.clone()),
        },
        Completion {
            shared,
            main_thread,
        },
    )
}

fn take_ready<T, E>(state: &mut State<T, E>) -> Option<TaskResult<T, E>> {
    if !matches!(state, State::Ready(_)) {
        return None;
    }
    match std::mem::replace(state, State::Taken) {
        State::Ready(result) => Some(result),
        _ => None,
    }
}

/// Resolving side of a completion
///
/// Dropping it without resolving resolves the completion with
/// [`TaskError::Abandoned`].
pub(crate) struct Resolver<T, E> {
    shared: Option<Arc<Shared<T, E>>>,
}

impl<T, E> Resolver<T, E> {
    /// Deliver the outcome
    ///
    /// Returns the outcome back when the awaiting side is gone, so the caller
    /// can report failures nobody will observe.
    pub fn resolve(mut self, result: TaskResult<T, E>) -> Result<(), TaskResult<T, E>> {
        self.deliver(result)
    }

    fn deliver(&mut self, result: TaskResult<T, E>) -> Result<(), TaskResult<T, E>> {
        let Some(shared) = self.shared.take() else {
            return Ok(());
        };

        let waker = {
            let mut state = shared.state.lock();
            match std::mem::replace(&mut *state, State::Taken) {
                State::Pending { waker } => {
                    *state = State::Ready(result);
                    waker
                }
                State::Detached => {
                    *state = State::Detached;
                    return Err(result);
                }
                resolved => {
                    *state = resolved;
                    return Ok(());
                }
            }
        };

        shared.resolved.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }
}

impl<T, E> Drop for Resolver<T, E> {
    fn drop(&mut self) {
        let _ = self.deliver(Err(TaskError::Abandoned));
    }
}

/// Handle to the outcome of work scheduled on the main thread
///
/// Await it from async code (cooperative, never blocks the thread), or use
/// [`wait`](Self::wait) from plain background threads.
#[must_use = "dropping a completion discards the task's outcome"]
pub struct Completion<T, E = Infallible> {
    shared: Arc<Shared<T, E>>,
    main_thread: Option<ThreadId>,
}

impl<T, E> Completion<T, E> {
    /// Check whether the outcome is available
    pub fn is_resolved(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Ready(_))
    }

    /// Take the outcome if it's available, without registering a waker
    pub fn try_take(&mut self) -> Option<TaskResult<T, E>> {
        take_ready(&mut self.shared.state.lock())
    }

    /// Block the current thread until the outcome is available
    ///
    /// # Warning
    /// Only call from background threads. On the main thread the item can
    /// never run while we block, so an unresolved completion returns
    /// [`TaskError::WouldBlockMainThread`] immediately.
    pub fn wait(self) -> TaskResult<T, E> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(result) = take_ready(&mut state) {
                return result;
            }
            if self.on_main_thread() {
                return Err(TaskError::WouldBlockMainThread);
            }
            self.shared.resolved.wait(&mut state);
        }
    }

    /// Block until the outcome is available or `timeout` elapses
    ///
    /// Returns the completion back on timeout so the caller can keep waiting.
    /// A timeout past the clock's range waits like [`wait`](Self::wait).
    pub fn wait_timeout(self, timeout: Duration) -> Result<TaskResult<T, E>, Self> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Ok(self.wait());
        };
        let outcome = {
            let mut state = self.shared.state.lock();
            loop {
                if let Some(result) = take_ready(&mut state) {
                    break Some(result);
                }
                if self.on_main_thread() {
                    break Some(Err(TaskError::WouldBlockMainThread));
                }
                if self
                    .shared
                    .resolved
                    .wait_until(&mut state, deadline)
                    .timed_out()
                {
                    break take_ready(&mut state);
                }
            }
        };

        outcome.ok_or(self)
    }

    fn on_main_thread(&self) -> bool {
        self.main_thread == Some(std::thread::current().id())
    }
}

impl<T, E> Future for Completion<T, E> {
    type Output = TaskResult<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        if let Some(result) = take_ready(&mut state) {
            return Poll::Ready(result);
        }

        match &mut *state {
            State::Pending { waker } => {
                if !waker.as_ref().is_some_and(|w| w.will_wake(cx.waker())) {
                    *waker = Some(cx.waker().clone());
                }
                Poll::Pending
            }
            _ => panic!("Completion polled after it resolved"),
        }
    }
}

impl<T, E> Drop for Completion<T, E> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if matches!(*state, State::Pending { .. }) {
            *state = State::Detached;
        }
    }
}

impl<T, E> std::fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
