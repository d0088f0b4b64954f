//! Pool errors.

use thiserror::Error;

/// Errors raised by [`CompositePool`](crate::CompositePool).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Capacity or slot size unusable.
    #[error("invalid pool geometry: {0}")]
    InvalidGeometry(String),

    /// Buffer id outside the pool.
    #[error("buffer id {buffer_id} out of range (capacity {capacity})")]
    BufferIdOutOfRange {
        /// Requested id.
        buffer_id: usize,
        /// Pool capacity.
        capacity: usize,
    },

    /// Frame does not map to the requested slot.
    #[error("frame {frame} does not map to buffer {buffer_id}")]
    SlotMismatch {
        /// Requested slot.
        buffer_id: usize,
        /// Frame that asked for it.
        frame: u64,
    },

    /// Frame already claimed its slot.
    #[error("frame {frame} already claimed buffer {buffer_id}")]
    FrameAlreadyClaimed {
        /// Offending frame.
        frame: u64,
        /// Its slot.
        buffer_id: usize,
    },

    /// Release of a slot that is not in flight (double completion).
    #[error("buffer {buffer_id} released but not in flight")]
    NotInFlight {
        /// Slot that was already free.
        buffer_id: usize,
    },

    /// Payload does not fit in a slot.
    #[error("payload of {length} bytes exceeds slot size {capacity}")]
    PayloadTooLarge {
        /// Requested payload length.
        length: usize,
        /// Slot size.
        capacity: usize,
    },
}
