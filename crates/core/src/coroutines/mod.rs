//! Step scheduler for suspendable work
//!
//! Coroutines run their first step when started and are then resumed by
//! [`StepScheduler::tick`], which the frame loop calls once per tick:
//! - `Step::Yield` resumes on the next tick
//! - `Step::WaitTicks(n)` resumes after `n` ticks
//! - `Step::WaitFor(d)` resumes on the first tick after `d` has passed
//!
//! # Example
//!
//! ```ignore
//! use mainthread_core::coroutines::{Step, StepContext, StepScheduler};
//!
//! let mut steps = StepScheduler::new();
//! let mut remaining = 3;
//! steps.start(move |_: &StepContext| {
//!     remaining -= 1;
//!     if remaining == 0 { Step::Done } else { Step::Yield }
//! });
//!
//! // Once per tick
//! steps.tick();
//! ```

mod coroutine;
mod sequence;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use slotmap::SlotMap;

pub use coroutine::{Coroutine, CoroutineKey, Step, StepContext};
pub use sequence::Sequence;
use coroutine::WakeCondition;

use crate::error::{log_failure_handler, FailureHandler, ItemFailure};

/// A coroutine waiting for its next step
struct Running {
    coroutine: Box<dyn Coroutine>,
    wake: WakeCondition,
    started_frame: u64,
}

/// Drives coroutines across ticks
pub struct StepScheduler {
    running: SlotMap<CoroutineKey, Running>,
    frame: u64,
    failure_handler: FailureHandler,
}

impl Default for StepScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl StepScheduler {
    /// Create a scheduler that logs panicking coroutines
    pub fn new() -> Self {
        Self::with_failure_handler(log_failure_handler())
    }

    /// Create a scheduler reporting panicking coroutines to `handler`
    pub fn with_failure_handler(handler: FailureHandler) -> Self {
        Self {
            running: SlotMap::with_key(),
            frame: 0,
            failure_handler: handler,
        }
    }

    pub(crate) fn set_failure_handler(&mut self, handler: FailureHandler) {
        self.failure_handler = handler;
    }

    /// Start a coroutine, running its first step immediately
    ///
    /// # Returns
    /// The key of the running coroutine, or `None` if it finished (or
    /// panicked) in its first step
    pub fn start<C>(&mut self, coroutine: C) -> Option<CoroutineKey>
    where
        C: Coroutine + 'static,
    {
        self.start_boxed(Box::new(coroutine))
    }

    /// Start an already boxed coroutine
    pub fn start_boxed(&mut self, coroutine: Box<dyn Coroutine>) -> Option<CoroutineKey> {
        let key = self.running.insert(Running {
            coroutine,
            wake: WakeCondition::AtFrame(self.frame),
            started_frame: self.frame,
        });

        self.step(key).then_some(key)
    }

    /// Advance one tick and resume every coroutine that is due
    ///
    /// Returns the number of coroutines resumed.
    pub fn tick(&mut self) -> usize {
        self.frame += 1;
        let frame = self.frame;
        let now = Instant::now();

        let due: Vec<CoroutineKey> = self
            .running
            .iter()
            .filter(|(_, running)| running.wake.is_due(frame, now))
            .map(|(key, _)| key)
            .collect();

        for &key in &due {
            self.step(key);
        }

        due.len()
    }

    /// Run one step, returns `true` if the coroutine is still running
    fn step(&mut self, key: CoroutineKey) -> bool {
        let frame = self.frame;
        let Some(running) = self.running.get_mut(key) else {
            return false;
        };

        let cx = StepContext {
            frame,
            key,
            started_frame: running.started_frame,
        };
        let coroutine = &mut running.coroutine;

        match catch_unwind(AssertUnwindSafe(|| coroutine.resume(&cx))) {
            Ok(step) => match WakeCondition::after(step, frame, Instant::now()) {
                Some(wake) => {
                    running.wake = wake;
                    true
                }
                None => {
                    self.running.remove(key);
                    false
                }
            },
            Err(payload) => {
                self.running.remove(key);
                let failure = ItemFailure::from_panic(payload);
                tracing::debug!("Coroutine stopped on frame {}: {}", frame, failure);
                (self.failure_handler)(&failure);
                false
            }
        }
    }

    /// Stop a running coroutine
    ///
    /// # Returns
    /// `true` if the coroutine was found and stopped
    pub fn stop(&mut self, key: CoroutineKey) -> bool {
        self.running.remove(key).is_some()
    }

    /// Stop every running coroutine, returns how many were stopped
    pub fn stop_all(&mut self) -> usize {
        let stopped = self.running.len();
        self.running.clear();
        stopped
    }

    pub fn is_running(&self, key: CoroutineKey) -> bool {
        self.running.contains_key(key)
    }

    /// Number of running coroutines
    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Current tick
    pub fn frame(&self) -> u64 {
        self.frame
    }
}
