//! Capture-side production counters.
//!
//! Single writer (the capture subsystem), many readers (workers). Every
//! field is an atomic, so no lock is needed. Heads only move forward.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters published by the capture subsystem.
#[derive(Debug)]
pub struct OnlineStatistics {
    heads: Box<[AtomicU64]>,
    trigger_position: AtomicU64,
    good_packets: AtomicU64,
}

impl OnlineStatistics {
    /// Create zeroed counters for `modules` modules.
    #[must_use]
    pub fn new(modules: usize) -> Self {
        Self {
            heads: (0..modules).map(|_| AtomicU64::new(0)).collect(),
            trigger_position: AtomicU64::new(0),
            good_packets: AtomicU64::new(0),
        }
    }

    /// Number of module head counters.
    #[must_use]
    pub fn modules(&self) -> usize {
        self.heads.len()
    }

    /// Highest frame known produced for `module`.
    ///
    /// # Panics
    /// Panics if `module` is out of range.
    #[inline]
    #[must_use]
    pub fn head(&self, module: usize) -> u64 {
        self.heads[module].load(Ordering::Acquire)
    }

    /// Snapshot of every module head, for progress logging.
    #[must_use]
    pub fn heads(&self) -> Vec<u64> {
        self.heads
            .iter()
            .map(|head| head.load(Ordering::Acquire))
            .collect()
    }

    /// Smallest head over all modules.
    #[inline]
    #[must_use]
    pub fn slowest_head(&self) -> u64 {
        self.heads
            .iter()
            .map(|head| head.load(Ordering::Acquire))
            .min()
            .unwrap_or(0)
    }

    /// Record that `module` has produced `frame`.
    ///
    /// Monotonic: a lower value than the current head is ignored. Release
    /// ordering publishes the frame data written before this call.
    pub fn advance_head(&self, module: usize, frame: u64) {
        self.heads[module].fetch_max(frame, Ordering::Release);
    }

    /// Frame at which the capture hardware saw the trigger.
    #[must_use]
    pub fn trigger_position(&self) -> u64 {
        self.trigger_position.load(Ordering::Acquire)
    }

    /// Publish the trigger position.
    pub fn set_trigger_position(&self, frame: u64) {
        self.trigger_position.store(frame, Ordering::Release);
    }

    /// Packets received without error.
    #[must_use]
    pub fn good_packets(&self) -> u64 {
        self.good_packets.load(Ordering::Relaxed)
    }

    /// Count `count` more good packets.
    pub fn add_good_packets(&self, count: u64) {
        self.good_packets.fetch_add(count, Ordering::Relaxed);
    }
}
