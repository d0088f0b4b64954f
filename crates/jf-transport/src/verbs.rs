//! Minimal verbs surface used by the send path.
//!
//! Only what the sender needs: memory registration, signaled sends with
//! immediate data, and completion polling. Queue-pair state transitions
//! belong to the provider and are not modelled here.

use crate::error::TransportError;
use crate::handshake::EndpointParams;
use jf_pool::MemoryKey;
use thiserror::Error;

/// One send descriptor with a single scatter-gather entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendWorkRequest {
    /// Echoed in the completion; the pool buffer id.
    pub wr_id: u64,
    /// Address of the payload inside a registered region.
    pub addr: u64,
    /// Payload length in bytes.
    pub length: u32,
    /// Key of the registered region holding the payload.
    pub lkey: MemoryKey,
    /// Immediate data in network byte order; the logical frame number.
    pub imm_data: u32,
    /// Request a completion entry for this send.
    pub signaled: bool,
}

impl SendWorkRequest {
    /// Logical frame carried in the immediate data.
    #[must_use]
    pub fn frame(&self) -> u32 {
        u32::from_be(self.imm_data)
    }
}

/// Outcome of a finished work request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Payload delivered.
    Success,
    /// Descriptor pointed outside the registered region or used a wrong key.
    LocalProtection,
    /// Remote side refused the write.
    RemoteAccess,
    /// Queue pair moved to error state; request flushed.
    Flushed,
    /// Any other provider status code.
    Other(i32),
}

/// Completion queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkCompletion {
    /// Id of the completed request.
    pub wr_id: u64,
    /// Completion status.
    pub status: CompletionStatus,
}

/// Reasons a send could not be queued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostSendError {
    /// Send queue full; retry after completions drain.
    #[error("send queue full")]
    NoResources,
    /// Provider rejected the request.
    #[error("send rejected with code {0}")]
    Rejected(i32),
}

/// Connected reliable queue pair as seen by the sender.
pub trait QueuePair: Send + Sync {
    /// Register `len` bytes at `addr` for local reads by the NIC.
    fn register_memory(&self, addr: u64, len: usize) -> Result<MemoryKey, TransportError>;

    /// Queue one send.
    fn post_send(&self, request: &SendWorkRequest) -> Result<(), PostSendError>;

    /// Pop one completion, `None` if the queue is empty.
    fn poll_completion(&self) -> Result<Option<WorkCompletion>, TransportError>;

    /// Local connection parameters to hand to the peer.
    fn local_endpoint(&self) -> EndpointParams;
}
