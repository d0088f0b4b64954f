//! Error type for the pipeline crate.
//!
//! `PipelineError` collects everything that can end a run. Library crates
//! keep their own error enums; `#[from]` lets `?` lift them here.
//!
//! ## Error Hierarchy
//!
//! - **`TriggerTimeout` / `SourceTimeout`**: an opt-in deadline expired while
//!   waiting on capture. Without deadlines these waits never fail.
//! - **`SourceOverrun`**: a raw frame was overwritten before a worker read it.
//! - **`Transport`**: post or completion failure; fatal for the run.
//! - **`Cancelled`**: this thread stopped because another thread failed.
//! - **`Configuration`**: semantic problems found by validation.

use jf_core::CoreError;
use jf_pool::PoolError;
use jf_transform::TransformError;
use jf_transport::{HandshakeError, TransportError};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using [`PipelineError`].
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors that end a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The trigger deadline expired.
    #[error("no trigger observed within {waited:?}")]
    TriggerTimeout {
        /// Time spent waiting.
        waited: Duration,
    },

    /// The availability deadline expired.
    #[error("raw frame {frame} not produced within {waited:?}")]
    SourceTimeout {
        /// Absolute frame the worker needed.
        frame: u64,
        /// Time spent waiting.
        waited: Duration,
    },

    /// A raw frame was overwritten before it was read.
    #[error("raw frame {frame} was overwritten before it was read")]
    SourceOverrun {
        /// Absolute frame that was lost.
        frame: u64,
    },

    /// Another thread failed and the run is shutting down.
    #[error("run cancelled")]
    Cancelled,

    /// A worker or the reclaimer thread panicked.
    #[error("thread {0} panicked")]
    ThreadPanicked(String),

    /// Configuration is unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Layout, settings or polling failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Buffer pool misuse.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Transform input rejected.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// Send path failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Peer setup exchange failed.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Thread spawn or socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether this error is only a consequence of another thread failing.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
