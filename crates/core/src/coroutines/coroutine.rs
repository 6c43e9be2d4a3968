//! Coroutine trait, steps and wake conditions

use std::time::{Duration, Instant};

use slotmap::new_key_type;

new_key_type! {
    /// Key for running coroutines
    pub struct CoroutineKey;
}

/// What a coroutine wants after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Resume on the next tick
    Yield,
    /// Resume after this many ticks (at least one)
    WaitTicks(u32),
    /// Resume on the first tick at or after this much time has passed
    WaitFor(Duration),
    /// Finished, never resume
    Done,
}

/// Information passed to each step
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    /// Scheduler tick this step runs on
    pub frame: u64,
    /// Key of the running coroutine
    pub key: CoroutineKey,
    /// Tick the coroutine was started on
    pub started_frame: u64,
}

/// A multi-step unit of work resumed by the host across ticks
///
/// State lives in the implementing type; each call to `resume` runs one
/// step and reports when it wants to continue.
pub trait Coroutine: Send {
    /// Run the next step
    fn resume(&mut self, cx: &StepContext) -> Step;
}

impl<F> Coroutine for F
where
    F: FnMut(&StepContext) -> Step + Send,
{
    fn resume(&mut self, cx: &StepContext) -> Step {
        self(cx)
    }
}

/// When a suspended coroutine becomes due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeCondition {
    AtFrame(u64),
    AtInstant(Instant),
    /// Deadline past the clock's range
    Never,
}

impl WakeCondition {
    /// Wake condition after `step` ran on `frame`, `None` when finished
    pub fn after(step: Step, frame: u64, now: Instant) -> Option<Self> {
        match step {
            Step::Yield => Some(Self::AtFrame(frame.saturating_add(1))),
            Step::WaitTicks(ticks) => Some(Self::AtFrame(
                frame.saturating_add(u64::from(ticks.max(1))),
            )),
            Step::WaitFor(delay) => Some(
                now.checked_add(delay)
                    .map_or(Self::Never, Self::AtInstant),
            ),
            Step::Done => None,
        }
    }

    pub fn is_due(&self, frame: u64, now: Instant) -> bool {
        match *self {
            Self::AtFrame(at) => frame >= at,
            Self::AtInstant(at) => now >= at,
            Self::Never => false,
        }
    }
}
