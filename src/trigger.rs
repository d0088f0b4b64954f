//! Trigger synchronization.
//!
//! Every output frame index is relative to the capture frame at which the
//! physical trigger arrived. Worker 0 watches the capture counters for it and
//! publishes the value once; every other worker blocks on the latch until
//! then. The latch is single-use: it never reopens during a run.

use crate::error::{PipelineError, PipelineResult};
use jf_core::limits::{CANCEL_CHECK_INTERVAL, TRIGGER_POLL_INTERVAL};
use jf_core::{poll_until, CoreError, ExperimentSettings, OnlineStatistics, PollPolicy};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Worker that observes the trigger.
pub const TRIGGER_WORKER: usize = 0;

/// Write-once value that any number of threads can wait for.
#[derive(Debug, Default)]
pub struct TriggerLatch {
    frame: Mutex<Option<u64>>,
    opened: Condvar,
}

impl TriggerLatch {
    /// Create a closed latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the latch with `frame` and wake every waiter.
    ///
    /// Only the first call has an effect; the latched value is returned.
    pub fn open(&self, frame: u64) -> u64 {
        let mut latched = self.frame.lock();
        match *latched {
            Some(existing) => existing,
            None => {
                *latched = Some(frame);
                self.opened.notify_all();
                frame
            }
        }
    }

    /// Latched value, if open.
    #[must_use]
    pub fn get(&self) -> Option<u64> {
        *self.frame.lock()
    }

    /// Block until the latch opens.
    ///
    /// Wakes periodically to honour `cancel`. Gives up after `deadline` if
    /// one is set.
    pub fn wait(&self, cancel: &AtomicBool, deadline: Option<Duration>) -> PipelineResult<u64> {
        let started = Instant::now();
        let mut latched = self.frame.lock();
        loop {
            if let Some(frame) = *latched {
                return Ok(frame);
            }
            if cancel.load(Ordering::Acquire) {
                return Err(PipelineError::Cancelled);
            }
            let waited = started.elapsed();
            let mut sleep = CANCEL_CHECK_INTERVAL;
            if let Some(deadline) = deadline {
                if waited >= deadline {
                    return Err(PipelineError::TriggerTimeout { waited });
                }
                sleep = sleep.min(deadline - waited);
            }
            self.opened.wait_for(&mut latched, sleep);
        }
    }
}

/// Trigger barrier shared by all workers of a run.
#[derive(Debug)]
pub struct TriggerSynchronizer {
    latch: TriggerLatch,
    stats: Arc<OnlineStatistics>,
    settings: ExperimentSettings,
    poll: PollPolicy,
}

impl TriggerSynchronizer {
    /// Create the barrier for one run.
    ///
    /// `deadline` bounds the wait for the trigger; `None` waits forever.
    #[must_use]
    pub fn new(
        stats: Arc<OnlineStatistics>,
        settings: ExperimentSettings,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            latch: TriggerLatch::new(),
            stats,
            settings,
            poll: PollPolicy::every(TRIGGER_POLL_INTERVAL).with_deadline(deadline),
        }
    }

    /// Override the trigger poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    /// Latched trigger frame, if observed.
    #[must_use]
    pub fn trigger_frame(&self) -> Option<u64> {
        self.latch.get()
    }

    /// Return the run's trigger frame, waiting for it if necessary.
    ///
    /// Worker [`TRIGGER_WORKER`] polls the capture counters until the
    /// trigger position reaches the pre-trigger frame count; all others wait
    /// for it to publish.
    pub fn await_trigger(&self, worker: usize, cancel: &AtomicBool) -> PipelineResult<u64> {
        if worker != TRIGGER_WORKER {
            let frame = self.latch.wait(cancel, self.poll.deadline)?;
            debug!(worker, trigger_frame = frame, "trigger received");
            return Ok(frame);
        }

        let threshold = self.settings.pedestal_g0_frames;
        let position = poll_until(&self.poll, "trigger", || {
            if cancel.load(Ordering::Acquire) {
                return Some(Err(PipelineError::Cancelled));
            }
            let position = self.stats.trigger_position();
            (position >= threshold).then_some(Ok(position))
        })
        .map_err(|e| match e {
            CoreError::PollTimeout { waited, .. } => PipelineError::TriggerTimeout { waited },
            other => PipelineError::Core(other),
        })??;

        let frame = self.latch.open(position);
        info!(trigger_frame = frame, "trigger observed");
        if !self.settings.trigger_fits(frame) {
            warn!(
                trigger_frame = frame,
                nframes_to_write = self.settings.nframes_to_write,
                summation = self.settings.summation,
                nframes_to_collect = self.settings.nframes_to_collect,
                "trigger observed too late, frames at the end of the dataset will not be collected"
            );
        }
        Ok(frame)
    }
}
