//! Work items accepted by the dispatcher

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::coroutines::{Coroutine, Sequence};
use crate::error::{BoxError, ItemFailure};

/// A single-shot unit of work to run on the main thread
pub type Task = Box<dyn FnOnce() -> Result<(), BoxError> + Send + 'static>;

/// A unit of deferred execution
pub enum WorkItem {
    /// Runs to completion in the drain that picks it up
    Immediate(Task),
    /// Runs its first step in the drain that picks it up, then continues on
    /// later ticks through the step scheduler
    Suspendable(Box<dyn Coroutine>),
}

impl WorkItem {
    /// Wrap an infallible closure
    pub fn immediate<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::Immediate(Box::new(move || {
            f();
            Ok(())
        }))
    }

    /// Wrap a closure whose error is reported as an unhandled failure
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::Immediate(Box::new(move || f().map_err(Into::into)))
    }

    /// Wrap a coroutine
    pub fn suspendable<C>(coroutine: C) -> Self
    where
        C: Coroutine + 'static,
    {
        Self::Suspendable(Box::new(coroutine))
    }

    /// Check whether this item continues across ticks
    pub fn is_suspendable(&self) -> bool {
        matches!(self, Self::Suspendable(_))
    }
}

impl From<Sequence> for WorkItem {
    fn from(sequence: Sequence) -> Self {
        Self::suspendable(sequence)
    }
}

impl From<Box<dyn Coroutine>> for WorkItem {
    fn from(coroutine: Box<dyn Coroutine>) -> Self {
        Self::Suspendable(coroutine)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(_) => f.write_str("WorkItem::Immediate"),
            Self::Suspendable(_) => f.write_str("WorkItem::Suspendable"),
        }
    }
}

/// Run an immediate task, isolating errors and panics to this one item
pub(crate) fn run_task(task: Task) -> Result<(), ItemFailure> {
    match catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(ItemFailure::Error(error)),
        Err(payload) => Err(ItemFailure::from_panic(payload)),
    }
}
