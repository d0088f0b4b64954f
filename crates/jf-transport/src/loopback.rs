//! In-process queue pair.
//!
//! Stands in for an RDMA NIC in simulation and tests. A send is executed
//! synchronously inside `post_send`: the payload is copied out of the
//! registered region, handed to an optional receiver channel, and a
//! completion is queued. The send queue is bounded, so a sender that
//! outruns the completion reclaimer sees [`PostSendError::NoResources`]
//! exactly as it would on hardware.
//!
//! Faults can be injected to exercise the error paths: rejected posts,
//! failed completions and forced queue-full conditions.

use crate::error::TransportError;
use crate::handshake::EndpointParams;
use crate::verbs::{CompletionStatus, PostSendError, QueuePair, SendWorkRequest, WorkCompletion};
use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use jf_pool::MemoryKey;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use tracing::{trace, warn};

const FIRST_KEY: u32 = 0x100;

static NEXT_QP_NUM: AtomicU32 = AtomicU32::new(0x40);

/// A payload as delivered to the receiving side.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    /// Logical frame from the immediate data.
    pub frame: u32,
    /// Sender's buffer id.
    pub buffer_id: u64,
    /// Copy of the payload.
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    key: MemoryKey,
    addr: u64,
    len: usize,
}

impl Region {
    fn contains(&self, addr: u64, len: usize) -> bool {
        addr >= self.addr && addr + len as u64 <= self.addr + self.len as u64
    }
}

#[derive(Debug, Default)]
struct Faults {
    rejections: u32,
    reject_code: i32,
    forced_full: u32,
    failed_completion: Option<(u64, CompletionStatus)>,
}

/// Loopback queue pair with a bounded send queue.
#[derive(Debug)]
pub struct LoopbackQueuePair {
    depth: usize,
    outstanding: AtomicUsize,
    completions: ArrayQueue<WorkCompletion>,
    regions: Mutex<Vec<Region>>,
    sink: Mutex<Option<Sender<ReceivedFrame>>>,
    faults: Mutex<Faults>,
    sends: AtomicU64,
    qp_num: u32,
}

impl LoopbackQueuePair {
    /// Create a queue pair accepting up to `depth` outstanding sends.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            depth,
            outstanding: AtomicUsize::new(0),
            completions: ArrayQueue::new(depth),
            regions: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            faults: Mutex::new(Faults::default()),
            sends: AtomicU64::new(0),
            qp_num: NEXT_QP_NUM.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Deliver every successful payload to `sink`.
    #[must_use]
    pub fn with_sink(self, sink: Sender<ReceivedFrame>) -> Self {
        *self.sink.lock() = Some(sink);
        self
    }

    /// Reject the next `count` posts with `code`.
    pub fn inject_rejections(&self, count: u32, code: i32) {
        let mut faults = self.faults.lock();
        faults.rejections = count;
        faults.reject_code = code;
    }

    /// Report a full queue for the next `count` posts.
    pub fn inject_queue_full(&self, count: u32) {
        self.faults.lock().forced_full = count;
    }

    /// Complete the send with zero-based sequence number `send` with `status`.
    pub fn inject_completion_status(&self, send: u64, status: CompletionStatus) {
        self.faults.lock().failed_completion = Some((send, status));
    }

    /// Sends accepted so far.
    #[must_use]
    pub fn sends(&self) -> u64 {
        self.sends.load(Ordering::Relaxed)
    }

    /// Sends whose completion has not been polled yet.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn check_faults(&self) -> Result<(), PostSendError> {
        let mut faults = self.faults.lock();
        if faults.forced_full > 0 {
            faults.forced_full -= 1;
            return Err(PostSendError::NoResources);
        }
        if faults.rejections > 0 {
            faults.rejections -= 1;
            return Err(PostSendError::Rejected(faults.reject_code));
        }
        Ok(())
    }

    fn execute(&self, request: &SendWorkRequest, sequence: u64) -> CompletionStatus {
        if let Some((at, status)) = self.faults.lock().failed_completion {
            if at == sequence {
                return status;
            }
        }

        let length = request.length as usize;
        let registered = self
            .regions
            .lock()
            .iter()
            .any(|r| r.key == request.lkey && r.contains(request.addr, length));
        if !registered {
            warn!(wr_id = request.wr_id, addr = request.addr, length, "send outside registered memory");
            return CompletionStatus::LocalProtection;
        }

        if let Some(sink) = self.sink.lock().as_ref() {
            // SAFETY: the range lies inside a region registered by the owner
            // of that memory, which keeps it alive and unmoved while sends
            // are outstanding, and the sender does not write a posted slot
            // until its completion is reclaimed.
            #[allow(unsafe_code)]
            let payload =
                unsafe { std::slice::from_raw_parts(request.addr as *const u8, length) };
            let delivered = ReceivedFrame {
                frame: request.frame(),
                buffer_id: request.wr_id,
                data: Bytes::copy_from_slice(payload),
            };
            if sink.send(delivered).is_err() {
                return CompletionStatus::RemoteAccess;
            }
        }
        CompletionStatus::Success
    }
}

impl QueuePair for LoopbackQueuePair {
    fn register_memory(&self, addr: u64, len: usize) -> Result<MemoryKey, TransportError> {
        if addr == 0 || len == 0 {
            return Err(TransportError::Registration(format!(
                "empty region at {addr:#x} ({len} bytes)"
            )));
        }
        let mut regions = self.regions.lock();
        let key = MemoryKey(FIRST_KEY + regions.len() as u32);
        regions.push(Region { key, addr, len });
        Ok(key)
    }

    fn post_send(&self, request: &SendWorkRequest) -> Result<(), PostSendError> {
        self.check_faults()?;
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.depth).then_some(n + 1)
            })
            .map_err(|_| PostSendError::NoResources)?;

        let sequence = self.sends.fetch_add(1, Ordering::Relaxed);
        let status = self.execute(request, sequence);
        trace!(wr_id = request.wr_id, frame = request.frame(), ?status, "loopback send");

        if request.signaled {
            let completion = WorkCompletion {
                wr_id: request.wr_id,
                status,
            };
            // Bounded by the outstanding counter, so the queue has room.
            if self.completions.push(completion).is_err() {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                return Err(PostSendError::NoResources);
            }
        } else {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn poll_completion(&self) -> Result<Option<WorkCompletion>, TransportError> {
        let completion = self.completions.pop();
        if completion.is_some() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(completion)
    }

    fn local_endpoint(&self) -> EndpointParams {
        EndpointParams {
            lid: 1,
            qp_num: self.qp_num,
            rq_psn: 0,
            rkey: 0,
            remote_addr: 0,
        }
    }
}
