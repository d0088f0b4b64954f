//! Frame availability tracking.
//!
//! Workers may only read a raw frame once every module has produced it, so
//! the tracker reports the head of the slowest module. Once that head
//! reaches the last frame of the run the tracker reports
//! [`Availability::AllCollected`] instead of a number, so end-of-run is never
//! confused with a real frame index.

use crate::stats::OnlineStatistics;
use std::sync::Arc;

/// Result of an availability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Every module has produced at least this frame.
    Frame(u64),
    /// Collection is complete; every frame of the run is available.
    AllCollected,
}

impl Availability {
    /// Whether frame `frame` is available.
    #[inline]
    #[must_use]
    pub fn covers(&self, frame: u64) -> bool {
        match *self {
            Availability::Frame(latest) => latest >= frame,
            Availability::AllCollected => true,
        }
    }

    /// Frames produced beyond `needed`, or `None` once collection is complete.
    #[must_use]
    pub fn backlog(&self, needed: u64) -> Option<u64> {
        match *self {
            Availability::Frame(latest) => Some(latest.saturating_sub(needed)),
            Availability::AllCollected => None,
        }
    }
}

/// Read-only view over [`OnlineStatistics`] that answers availability queries.
///
/// Cheap to clone; every worker holds its own copy.
#[derive(Debug, Clone)]
pub struct FrameTracker {
    stats: Arc<OnlineStatistics>,
    nframes_to_collect: u64,
}

impl FrameTracker {
    /// Track production of a run collecting `nframes_to_collect` frames.
    #[must_use]
    pub fn new(stats: Arc<OnlineStatistics>, nframes_to_collect: u64) -> Self {
        Self {
            stats,
            nframes_to_collect,
        }
    }

    /// The most conservative frame index produced by all modules.
    ///
    /// O(module count), lock-free, no side effects.
    #[inline]
    #[must_use]
    pub fn latest_common_frame(&self) -> Availability {
        let slowest = self.stats.slowest_head();
        if slowest >= self.nframes_to_collect.saturating_sub(1) {
            Availability::AllCollected
        } else {
            Availability::Frame(slowest)
        }
    }

    /// Underlying statistics, for progress reporting.
    #[must_use]
    pub fn stats(&self) -> &Arc<OnlineStatistics> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(modules: usize, collect: u64) -> FrameTracker {
        FrameTracker::new(Arc::new(OnlineStatistics::new(modules)), collect)
    }

    #[test]
    fn reports_slowest_module() {
        let tracker = tracker(4, 1000);
        for (module, head) in [40, 12, 33, 27].into_iter().enumerate() {
            tracker.stats().advance_head(module, head);
        }
        assert_eq!(tracker.latest_common_frame(), Availability::Frame(12));
    }

    #[test]
    fn sentinel_once_slowest_module_reaches_end() {
        let tracker = tracker(2, 100);
        tracker.stats().advance_head(0, 99);
        tracker.stats().advance_head(1, 98);
        assert_eq!(tracker.latest_common_frame(), Availability::Frame(98));
        tracker.stats().advance_head(1, 99);
        assert_eq!(tracker.latest_common_frame(), Availability::AllCollected);
    }

    #[test]
    fn covers_and_backlog() {
        let latest = Availability::Frame(20);
        assert!(latest.covers(20));
        assert!(!latest.covers(21));
        assert_eq!(latest.backlog(15), Some(5));
        assert!(Availability::AllCollected.covers(u64::MAX));
        assert_eq!(Availability::AllCollected.backlog(3), None);
    }
}
