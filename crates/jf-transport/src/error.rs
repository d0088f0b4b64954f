//! Transport and handshake errors.

use crate::verbs::CompletionStatus;
use jf_pool::PoolError;
use thiserror::Error;

/// Errors on the RDMA send path.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Work request rejected by the provider with a non-retryable code.
    #[error("post_send for frame {frame} failed with code {code}")]
    PostFailed {
        /// Logical frame that could not be posted.
        frame: u64,
        /// Provider error code.
        code: i32,
    },

    /// A send completed with an error status.
    #[error("completion for buffer {wr_id} failed: {status:?}")]
    CompletionFailed {
        /// Work request id (pool buffer id).
        wr_id: u64,
        /// Reported status.
        status: CompletionStatus,
    },

    /// Polling the completion queue itself failed.
    #[error("completion queue poll failed with code {0}")]
    PollFailed(i32),

    /// Memory registration refused.
    #[error("memory registration failed: {0}")]
    Registration(String),

    /// Completion referred to a buffer the pool does not consider in flight.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Errors during the TCP setup exchange with the downstream peer.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// Socket failure.
    #[error("handshake I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The peer echoed or sent an unexpected magic number.
    #[error("magic number mismatch: expected {expected}, got {got}")]
    MagicMismatch {
        /// Value required by the protocol.
        expected: u64,
        /// Value received.
        got: u64,
    },

    /// A record could not be encoded or decoded.
    #[error("handshake record codec: {0}")]
    Codec(#[from] bincode::Error),

    /// A length prefix exceeded the record size limit.
    #[error("handshake record of {0} bytes exceeds limit")]
    RecordTooLarge(u32),

    /// The peer did not answer in time.
    #[error("handshake timed out waiting for {0}")]
    Timeout(&'static str),
}
