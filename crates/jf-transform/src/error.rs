//! Transform errors.

use thiserror::Error;

/// Errors raised while building a composite image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// The run is ending; there is nothing to transform.
    #[error("no transform for a quit session")]
    QuitSession,

    /// Wrong number of source frames for the selected transform.
    #[error("expected {expected} source frames, got {got}")]
    SourceCount {
        /// Frames required.
        expected: usize,
        /// Frames supplied.
        got: usize,
    },

    /// A source frame has the wrong pixel count.
    #[error("source frame has {got} pixels, layout needs {expected}")]
    SourceSize {
        /// Pixels per raw frame for the layout.
        expected: usize,
        /// Pixels supplied.
        got: usize,
    },

    /// Destination buffer too small for the payload.
    #[error("destination holds {got} bytes, payload needs {expected}")]
    DestinationTooSmall {
        /// Payload size.
        expected: usize,
        /// Destination size.
        got: usize,
    },

    /// Destination buffer not aligned for the output pixel type.
    #[error("destination not aligned for {0}-byte pixels")]
    Misaligned(usize),
}
