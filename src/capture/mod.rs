//! Capture side of the pipeline.
//!
//! Real capture hardware is outside this crate: it writes raw frames into a
//! [`RawFrameRing`](jf_core::RawFrameRing) and advances the
//! [`OnlineStatistics`](jf_core::OnlineStatistics) counters. [`mock`] provides
//! an in-process stand-in for simulation and tests.
//!
//! [`ConsumerCursor`] is the reverse channel: workers publish the oldest raw
//! frame they still need, so a producer that can be paused (the mock) never
//! laps the ring.

pub mod mock;

pub use mock::{pattern_frame, CaptureSummary, MockCapture, MockCaptureConfig};

use std::sync::atomic::{AtomicU64, Ordering};

/// Oldest raw frame each worker still needs.
#[derive(Debug)]
pub struct ConsumerCursor {
    positions: Box<[AtomicU64]>,
}

impl ConsumerCursor {
    /// Cursor for `workers` workers, all at frame 0.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            positions: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Number of workers tracked.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.positions.len()
    }

    /// Worker `worker` needs raw frames from `frame` on.
    pub fn set(&self, worker: usize, frame: u64) {
        self.positions[worker].store(frame, Ordering::Release);
    }

    /// Worker `worker` needs nothing more.
    pub fn finish(&self, worker: usize) {
        self.positions[worker].store(u64::MAX, Ordering::Release);
    }

    /// Oldest frame needed by any worker; `u64::MAX` once all are done.
    #[must_use]
    pub fn low_watermark(&self) -> u64 {
        self.positions
            .iter()
            .map(|p| p.load(Ordering::Acquire))
            .min()
            .unwrap_or(u64::MAX)
    }
}
