//! Per-tick driver for the main thread
//!
//! The host calls [`FrameLoop::run_frame`] once per tick on its main thread.
//! Each frame resumes waiting coroutines, drains the dispatcher, then fires
//! registered frame callbacks.

use std::time::{Duration, Instant};

use bitflags::bitflags;
use slotmap::{new_key_type, SlotMap};

use crate::config::DispatcherConfig;
use crate::error::DispatchResult;
use crate::tasks::{DispatchHandle, Dispatcher, DrainReport};

new_key_type! {
    /// Key for registered frame callbacks
    pub struct FrameKey;
}

bitflags! {
    /// Host-provided state of the current tick
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u32 {
        /// The simulation is running (not paused)
        const SIMULATING = 0x01;
        /// First tick of a rendered frame
        const FIRST_TICK = 0x02;
        /// Last tick of a rendered frame
        const LAST_TICK = 0x04;
    }
}

/// What happened during one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frame number, starting at 1
    pub frame: u64,
    pub flags: FrameFlags,
    /// Coroutines resumed by the step scheduler this frame
    pub resumed_coroutines: usize,
    /// Result of this frame's drain
    pub drain: DrainReport,
}

/// Callback type for frame listeners
pub type FrameCallback = Box<dyn FnMut(&FrameInfo) + Send>;

/// Owns the dispatcher and drives it once per tick
pub struct FrameLoop {
    dispatcher: Dispatcher,
    callbacks: SlotMap<FrameKey, FrameCallback>,
    frame_count: u64,
    last_frame_time: Duration,
    slow_frame_threshold: Option<Duration>,
}

impl FrameLoop {
    /// Create a frame loop with a dispatcher on a fresh handle
    ///
    /// Must be called on the thread that will run frames.
    pub fn new(config: &DispatcherConfig) -> DispatchResult<Self> {
        Self::with_handle(&DispatchHandle::new(), config)
    }

    /// Create a frame loop activating a dispatcher on `handle`
    pub fn with_handle(handle: &DispatchHandle, config: &DispatcherConfig) -> DispatchResult<Self> {
        Ok(Self {
            dispatcher: Dispatcher::activate(handle, config)?,
            callbacks: SlotMap::with_key(),
            frame_count: 0,
            last_frame_time: Duration::ZERO,
            slow_frame_threshold: config.slow_frame_threshold(),
        })
    }

    /// Producer handle for background threads
    pub fn handle(&self) -> DispatchHandle {
        self.dispatcher.handle()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Register a callback to be called at the end of every frame
    ///
    /// # Returns
    /// A key that can be used to unregister the callback
    pub fn register_callback<F>(&mut self, callback: F) -> FrameKey
    where
        F: FnMut(&FrameInfo) + Send + 'static,
    {
        self.callbacks.insert(Box::new(callback))
    }

    /// Unregister a frame callback
    ///
    /// # Returns
    /// `true` if the callback was found and removed
    pub fn unregister_callback(&mut self, key: FrameKey) -> bool {
        self.callbacks.remove(key).is_some()
    }

    /// Number of frames run so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Processing time of the last frame
    pub fn last_frame_time(&self) -> Duration {
        self.last_frame_time
    }

    /// Run one tick
    ///
    /// # Returns
    /// `Err(WrongThread)` if called off the main thread; nothing runs then
    pub fn run_frame(&mut self, flags: FrameFlags) -> DispatchResult<FrameInfo> {
        self.dispatcher.ensure_main_thread()?;
        let start = Instant::now();

        self.frame_count += 1;

        // Continue coroutines started on earlier frames
        let resumed_coroutines = self.dispatcher.steps_mut().tick();

        // Process queued work from other threads
        let drain = self.dispatcher.drain()?;
        if drain.executed > 0 {
            tracing::trace!("Processed {} queued items", drain.executed);
        }

        let info = FrameInfo {
            frame: self.frame_count,
            flags,
            resumed_coroutines,
            drain,
        };

        for (_, callback) in self.callbacks.iter_mut() {
            callback(&info);
        }

        self.last_frame_time = start.elapsed();
        if let Some(threshold) = self.slow_frame_threshold {
            if self.last_frame_time > threshold {
                tracing::warn!(
                    "Frame {} took {:?} (threshold {:?})",
                    self.frame_count,
                    self.last_frame_time,
                    threshold
                );
            }
        }

        Ok(info)
    }

    /// Shut down the dispatcher; pending work is dropped
    pub fn shutdown(self) {
        tracing::debug!("Frame loop stopping after {} frames", self.frame_count);
        self.dispatcher.shutdown();
    }
}
