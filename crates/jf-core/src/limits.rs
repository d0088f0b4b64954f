//! Shared timing constants and fixed pipeline limits.
//!
//! Centralised so the worker, reclaimer and transmitter agree on the same
//! pacing, and so tuning happens in one place.

use std::time::Duration;

// =============================================================================
// Poll Intervals
// =============================================================================

/// Sleep between trigger-position checks by the designated worker.
pub const TRIGGER_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Sleep between source-availability checks while a worker waits for capture.
pub const AVAILABILITY_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Sleep between empty completion-queue polls.
pub const COMPLETION_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Delay before resubmitting a send that the provider refused.
pub const POST_RETRY_DELAY: Duration = Duration::from_micros(200);

/// Longest a blocked worker sleeps before re-checking for run cancellation.
pub const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// Pipeline Limits
// =============================================================================

/// Extra frames every module must have produced beyond the last frame a
/// worker reads. Capture marks a frame as produced slightly before its last
/// packets have been corrected.
pub const AVAILABILITY_MARGIN_FRAMES: u64 = 3;

/// Largest summation factor. The sum of this many 16-bit samples below the
/// overload threshold still fits an `i32`.
pub const MAX_SUMMATION: u32 = 65_536;

/// Log a progress line every this many output frames.
pub const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Default send-queue depth; also the pool capacity at 16-bit pixel depth.
pub const DEFAULT_SEND_QUEUE_DEPTH: usize = 32;

/// Images per GPU stream slice at 16-bit depth (halved at 32 bit).
pub const DEFAULT_FRAMES_PER_STREAM: u64 = 320;
