//! Completion reclaimer: returns sent buffers to the pool.
//!
//! Runs on one dedicated thread for the whole run. Every successful
//! completion frees the pool slot named by its work-request id, which is the
//! only way a slot ever becomes free again after being posted.

use crate::error::TransportError;
use crate::verbs::{CompletionStatus, QueuePair};
use jf_core::limits::COMPLETION_POLL_INTERVAL;
use jf_pool::CompositePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Outcome of a reclaimer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimSummary {
    /// Completions processed.
    pub completed: u64,
    /// Empty polls of the completion queue.
    pub idle_polls: u64,
    /// Run was stopped before all completions arrived.
    pub cancelled: bool,
}

/// Drains the completion queue into the buffer pool.
pub struct CompletionReclaimer {
    qp: Arc<dyn QueuePair>,
    pool: Arc<CompositePool>,
    idle_sleep: Duration,
}

impl CompletionReclaimer {
    /// Create a reclaimer for `qp` releasing into `pool`.
    pub fn new(qp: Arc<dyn QueuePair>, pool: Arc<CompositePool>) -> Self {
        Self {
            qp,
            pool,
            idle_sleep: COMPLETION_POLL_INTERVAL,
        }
    }

    /// Override the sleep after an empty poll.
    #[must_use]
    pub fn with_idle_sleep(mut self, sleep: Duration) -> Self {
        self.idle_sleep = sleep;
        self
    }

    /// Process `expected` completions, or stop early once `cancel` is set.
    ///
    /// A completion with any status but success is fatal, as is a poll
    /// failure or a completion for a slot that is not in flight.
    pub fn run(&self, expected: u64, cancel: &AtomicBool) -> Result<ReclaimSummary, TransportError> {
        let mut summary = ReclaimSummary::default();
        debug!(expected, "completion reclaimer started");

        while summary.completed < expected {
            let Some(completion) = self.qp.poll_completion()? else {
                if cancel.load(Ordering::Acquire) {
                    summary.cancelled = true;
                    info!(
                        completed = summary.completed,
                        expected, "completion reclaimer cancelled"
                    );
                    return Ok(summary);
                }
                summary.idle_polls += 1;
                thread::sleep(self.idle_sleep);
                continue;
            };

            if completion.status != CompletionStatus::Success {
                error!(
                    wr_id = completion.wr_id,
                    status = ?completion.status,
                    "send completed with error"
                );
                return Err(TransportError::CompletionFailed {
                    wr_id: completion.wr_id,
                    status: completion.status,
                });
            }

            let frame = self.pool.release(completion.wr_id as usize)?;
            trace!(buffer_id = completion.wr_id, frame, "buffer reclaimed");
            summary.completed += 1;
        }

        debug!(completed = summary.completed, "completion reclaimer finished");
        Ok(summary)
    }
}

impl std::fmt::Debug for CompletionReclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionReclaimer")
            .field("pool", &self.pool)
            .field("idle_sleep", &self.idle_sleep)
            .finish_non_exhaustive()
    }
}
