//! Step sequences built from closures and waits

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use super::{Coroutine, Step, StepContext};

enum SequenceOp {
    Run(Box<dyn FnOnce() + Send>),
    Wait(Step),
}

/// A coroutine made of a fixed list of actions and waits
///
/// Each resume runs actions until it reaches a wait, then suspends with that
/// wait. The remaining list is the coroutine's whole state.
///
/// # Example
///
/// ```ignore
/// let fade = Sequence::new()
///     .then(|| println!("start"))
///     .yield_tick()
///     .then(|| println!("one tick later"))
///     .wait_for(Duration::from_millis(250))
///     .then(|| println!("done"));
/// handle.enqueue_coroutine(fade)?;
/// ```
#[derive(Default)]
pub struct Sequence {
    ops: VecDeque<SequenceOp>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action
    pub fn then<F>(mut self, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.ops.push_back(SequenceOp::Run(Box::new(action)));
        self
    }

    /// Suspend until the next tick
    pub fn yield_tick(self) -> Self {
        self.wait(Step::Yield)
    }

    /// Suspend for `ticks` ticks
    pub fn wait_ticks(self, ticks: u32) -> Self {
        self.wait(Step::WaitTicks(ticks))
    }

    /// Suspend until `delay` has passed
    pub fn wait_for(self, delay: Duration) -> Self {
        self.wait(Step::WaitFor(delay))
    }

    fn wait(mut self, step: Step) -> Self {
        self.ops.push_back(SequenceOp::Wait(step));
        self
    }

    /// Number of actions and waits left
    pub fn remaining(&self) -> usize {
        self.ops.len()
    }

    pub fn is_finished(&self) -> bool {
        self.ops.is_empty()
    }
}

impl Coroutine for Sequence {
    fn resume(&mut self, _cx: &StepContext) -> Step {
        while let Some(op) = self.ops.pop_front() {
            match op {
                SequenceOp::Run(action) => action(),
                SequenceOp::Wait(step) => return step,
            }
        }
        Step::Done
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("remaining", &self.ops.len())
            .finish()
    }
}
