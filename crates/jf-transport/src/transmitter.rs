//! RDMA transmitter: turns posted pool slots into send work requests.

use crate::error::TransportError;
use crate::verbs::{PostSendError, QueuePair, SendWorkRequest};
use jf_core::limits::POST_RETRY_DELAY;
use jf_pool::{InFlightSlot, MemoryKey};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// What to do when the provider rejects a send for a reason other than a
/// full queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitErrorPolicy {
    /// Log and retry after the retry delay, forever.
    Retry,
    /// Abort the run with [`TransportError::PostFailed`].
    #[default]
    FailFast,
}

/// Shared send side of one queue pair.
///
/// Any number of worker threads may post concurrently.
pub struct Transmitter {
    qp: Arc<dyn QueuePair>,
    lkey: MemoryKey,
    policy: SubmitErrorPolicy,
    retry_delay: Duration,
    posted: AtomicU64,
    queue_full_retries: AtomicU64,
}

impl Transmitter {
    /// Create a transmitter sending from the region registered under `lkey`.
    pub fn new(qp: Arc<dyn QueuePair>, lkey: MemoryKey, policy: SubmitErrorPolicy) -> Self {
        Self {
            qp,
            lkey,
            policy,
            retry_delay: POST_RETRY_DELAY,
            posted: AtomicU64::new(0),
            queue_full_retries: AtomicU64::new(0),
        }
    }

    /// Override the sleep between retries.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Build the work request for `slot`.
    ///
    /// The work-request id is the pool buffer id so the reclaimer can free
    /// the slot; the immediate data carries the logical frame number in
    /// network byte order.
    #[must_use]
    pub fn work_request(&self, slot: &InFlightSlot) -> SendWorkRequest {
        SendWorkRequest {
            wr_id: slot.buffer_id as u64,
            addr: slot.addr,
            length: slot.length as u32,
            lkey: self.lkey,
            imm_data: (slot.frame as u32).to_be(),
            signaled: true,
        }
    }

    /// Post `slot` to the queue pair.
    ///
    /// A full send queue is retried indefinitely. Other rejections follow
    /// the configured [`SubmitErrorPolicy`].
    pub fn post_send(&self, slot: &InFlightSlot) -> Result<(), TransportError> {
        let request = self.work_request(slot);
        let mut queue_full = 0u64;
        loop {
            match self.qp.post_send(&request) {
                Ok(()) => break,
                Err(PostSendError::NoResources) => {
                    if queue_full == 0 {
                        debug!(frame = slot.frame, "send queue full, retrying");
                    }
                    queue_full += 1;
                    thread::sleep(self.retry_delay);
                }
                Err(PostSendError::Rejected(code)) => match self.policy {
                    SubmitErrorPolicy::Retry => {
                        warn!(frame = slot.frame, code, "post_send rejected, retrying");
                        thread::sleep(self.retry_delay);
                    }
                    SubmitErrorPolicy::FailFast => {
                        error!(frame = slot.frame, code, "post_send rejected");
                        return Err(TransportError::PostFailed {
                            frame: slot.frame,
                            code,
                        });
                    }
                },
            }
        }
        self.posted.fetch_add(1, Ordering::Relaxed);
        self.queue_full_retries.fetch_add(queue_full, Ordering::Relaxed);
        Ok(())
    }

    /// Sends accepted by the queue pair.
    #[must_use]
    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }

    /// Times a send found the queue full.
    #[must_use]
    pub fn queue_full_retries(&self) -> u64 {
        self.queue_full_retries.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transmitter")
            .field("lkey", &self.lkey)
            .field("policy", &self.policy)
            .field("posted", &self.posted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackQueuePair;

    fn slot(frame: u64) -> InFlightSlot {
        InFlightSlot {
            buffer_id: 3,
            frame,
            addr: 0,
            length: 0,
        }
    }

    fn transmitter(qp: &Arc<LoopbackQueuePair>, policy: SubmitErrorPolicy) -> Transmitter {
        Transmitter::new(qp.clone(), MemoryKey(0), policy).with_retry_delay(Duration::from_micros(10))
    }

    #[test]
    fn work_request_carries_buffer_and_frame() {
        let qp = Arc::new(LoopbackQueuePair::new(4));
        let tx = transmitter(&qp, SubmitErrorPolicy::FailFast);
        let request = tx.work_request(&InFlightSlot {
            buffer_id: 7,
            frame: 0x0102_0304,
            addr: 0x1000,
            length: 64,
        });
        assert_eq!(request.wr_id, 7);
        assert_eq!(request.imm_data.to_ne_bytes(), [1, 2, 3, 4]);
        assert_eq!(request.frame(), 0x0102_0304);
        assert!(request.signaled);
    }

    #[test]
    fn fail_fast_surfaces_rejection() {
        let qp = Arc::new(LoopbackQueuePair::new(4));
        qp.inject_rejections(1, -22);
        let tx = transmitter(&qp, SubmitErrorPolicy::FailFast);
        assert!(matches!(
            tx.post_send(&slot(5)),
            Err(TransportError::PostFailed { frame: 5, code: -22 })
        ));
        assert_eq!(tx.posted(), 0);
    }

    #[test]
    fn retry_policy_outlasts_rejections() {
        let qp = Arc::new(LoopbackQueuePair::new(4));
        qp.inject_rejections(3, -5);
        let tx = transmitter(&qp, SubmitErrorPolicy::Retry);
        tx.post_send(&slot(1)).unwrap();
        assert_eq!(tx.posted(), 1);
    }

    #[test]
    fn full_queue_is_retried_until_drained() {
        let qp = Arc::new(LoopbackQueuePair::new(1));
        let tx = transmitter(&qp, SubmitErrorPolicy::FailFast);
        tx.post_send(&slot(0)).unwrap();

        thread::scope(|s| {
            s.spawn(|| tx.post_send(&slot(1)).unwrap());
            thread::sleep(Duration::from_millis(5));
            assert!(qp.poll_completion().unwrap().is_some());
        });
        assert_eq!(tx.posted(), 2);
        assert!(tx.queue_full_retries() > 0);
    }

    #[test]
    fn default_policy_is_fail_fast() {
        assert_eq!(SubmitErrorPolicy::default(), SubmitErrorPolicy::FailFast);
    }
}
