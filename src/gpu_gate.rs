//! GPU stream gate.
//!
//! Output frames are grouped into slices of `frames_per_stream` consecutive
//! frames. Each slice is processed by one GPU stream slot; slots are reused
//! cyclically, so at most `slots` slices can be in preparation at once.
//!
//! ```text
//! consumer                       slot k                      workers
//!   publish_ready(slice) ----> ready = writers  ----> enter_slice (ready -= 1)
//!                              writers_remaining            ... frames ...
//!   wait_writers_done  <------ writers_remaining -= 1 <-- finish_slice
//! ```
//!
//! A worker only enters a slice it has frames in, so the number of writers
//! per slice is `min(workers, frames in slice)`. The last slice may be short.

use crate::error::{PipelineError, PipelineResult};
use jf_core::limits::CANCEL_CHECK_INTERVAL;
use jf_core::PixelDepth;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Frames per slice for `depth`.
///
/// 4-byte pixels take twice the GPU memory per frame, so slices halve.
#[must_use]
pub fn frames_per_stream(configured: u64, depth: PixelDepth) -> u64 {
    match depth {
        PixelDepth::Two => configured.max(1),
        PixelDepth::Four => (configured / 2).max(1),
    }
}

#[derive(Debug, Default)]
struct SlotState {
    /// Slice currently published to this slot.
    slice: Option<u64>,
    ready: u64,
    writers_remaining: u64,
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
    done: Condvar,
}

/// Handshake between frame workers and the GPU stream consumer.
#[derive(Debug)]
pub struct GpuStreamGate {
    slots: Box<[Slot]>,
    frames_per_stream: u64,
    workers: u64,
    nframes: u64,
}

impl GpuStreamGate {
    /// Create a gate with `slots` stream slots for a run of `nframes`
    /// output frames handled by `workers` workers.
    pub fn new(slots: usize, frames_per_stream: u64, workers: usize, nframes: u64) -> PipelineResult<Self> {
        if slots == 0 || frames_per_stream == 0 || workers == 0 {
            return Err(PipelineError::Configuration(format!(
                "GPU gate needs non-zero slots ({slots}), frames per stream ({frames_per_stream}) and workers ({workers})"
            )));
        }
        Ok(Self {
            slots: (0..slots).map(|_| Slot::default()).collect(),
            frames_per_stream,
            workers: workers as u64,
            nframes,
        })
    }

    /// Slice that frame `frame` belongs to.
    #[inline]
    #[must_use]
    pub fn slice_of(&self, frame: u64) -> u64 {
        frame / self.frames_per_stream
    }

    /// Number of slices in the run.
    #[must_use]
    pub fn slices(&self) -> u64 {
        self.nframes.div_ceil(self.frames_per_stream)
    }

    /// Number of stream slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Workers that will write into `slice`.
    #[must_use]
    pub fn writers_for_slice(&self, slice: u64) -> u64 {
        let first = slice * self.frames_per_stream;
        let frames = self.nframes.saturating_sub(first).min(self.frames_per_stream);
        frames.min(self.workers)
    }

    fn slot(&self, slice: u64) -> &Slot {
        &self.slots[(slice % self.slots.len() as u64) as usize]
    }

    fn wait_on<'a, F>(
        slot: &'a Slot,
        condvar: &Condvar,
        cancel: &AtomicBool,
        mut done: F,
    ) -> PipelineResult<MutexGuard<'a, SlotState>>
    where
        F: FnMut(&SlotState) -> bool,
    {
        let mut state = slot.state.lock();
        while !done(&state) {
            if cancel.load(Ordering::Acquire) {
                return Err(PipelineError::Cancelled);
            }
            condvar.wait_for(&mut state, CANCEL_CHECK_INTERVAL);
        }
        Ok(state)
    }

    /// Block until `slice` is published, then take one unit of it.
    pub fn enter_slice(&self, slice: u64, cancel: &AtomicBool) -> PipelineResult<()> {
        let slot = self.slot(slice);
        let mut state = Self::wait_on(slot, &slot.ready, cancel, |s| {
            s.slice == Some(slice) && s.ready > 0
        })?;
        state.ready -= 1;
        trace!(slice, ready = state.ready, "entered GPU slice");
        Ok(())
    }

    /// Record that one writer is done with `slice`.
    pub fn finish_slice(&self, slice: u64) {
        let slot = self.slot(slice);
        let mut state = slot.state.lock();
        if state.slice != Some(slice) || state.writers_remaining == 0 {
            debug!(slice, "finish for a slice that is not pending");
            return;
        }
        state.writers_remaining -= 1;
        if state.writers_remaining == 0 {
            slot.done.notify_all();
        }
    }

    /// Publish `slice` to its slot with `units` writer units.
    ///
    /// The slot must be idle: call [`wait_writers_done`](Self::wait_writers_done)
    /// for the slice that previously used it first.
    pub fn publish_ready(&self, slice: u64, units: u64) {
        let slot = self.slot(slice);
        let mut state = slot.state.lock();
        state.slice = Some(slice);
        state.ready = units;
        state.writers_remaining = units;
        slot.ready.notify_all();
        trace!(slice, units, "GPU slice published");
    }

    /// Block until every writer of `slice` has finished it.
    pub fn wait_writers_done(&self, slice: u64, cancel: &AtomicBool) -> PipelineResult<()> {
        let slot = self.slot(slice);
        let _state = Self::wait_on(slot, &slot.done, cancel, |s| {
            s.slice != Some(slice) || s.writers_remaining == 0
        })?;
        Ok(())
    }

    /// Consumer loop for a whole run.
    ///
    /// Keeps up to `slot_count` slices published ahead of the workers and
    /// calls `process` with each slice once all of its writers are done.
    /// Returns the number of slices processed.
    pub fn drive<F>(&self, cancel: &AtomicBool, mut process: F) -> PipelineResult<u64>
    where
        F: FnMut(u64),
    {
        let total = self.slices();
        let ahead = self.slots.len() as u64;
        let mut processed = 0;

        for slice in 0..total {
            if slice >= ahead {
                let previous = slice - ahead;
                self.wait_writers_done(previous, cancel)?;
                process(previous);
                processed += 1;
            }
            self.publish_ready(slice, self.writers_for_slice(slice));
        }
        for slice in total.saturating_sub(ahead)..total {
            self.wait_writers_done(slice, cancel)?;
            process(slice);
            processed += 1;
        }
        debug!(processed, "GPU stream consumer finished");
        Ok(processed)
    }
}

/// A worker's position in the gate.
#[derive(Debug, Default)]
pub struct GateCursor {
    current: Option<u64>,
}

impl GateCursor {
    /// Create a cursor outside any slice.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to the slice of `frame`, finishing the previous one.
    pub fn advance(&mut self, gate: &GpuStreamGate, frame: u64, cancel: &AtomicBool) -> PipelineResult<()> {
        let slice = gate.slice_of(frame);
        if self.current == Some(slice) {
            return Ok(());
        }
        if let Some(previous) = self.current.take() {
            gate.finish_slice(previous);
        }
        gate.enter_slice(slice, cancel)?;
        self.current = Some(slice);
        Ok(())
    }

    /// Finish the current slice, if any.
    pub fn finish(&mut self, gate: &GpuStreamGate) {
        if let Some(slice) = self.current.take() {
            gate.finish_slice(slice);
        }
    }
}
