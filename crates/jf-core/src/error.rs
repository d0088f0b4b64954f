//! Error type for the core crate.
//!
//! Configuration problems are permanent and surface before any worker thread
//! starts. `PollTimeout` only appears when a caller opted into a deadline;
//! production runs wait indefinitely.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using [`CoreError`].
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Errors raised by layout construction, settings validation and polling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Module count cannot be arranged two modules per output row.
    #[error("invalid detector layout: {modules} modules (must be even and non-zero)")]
    InvalidLayout {
        /// Requested module count.
        modules: usize,
    },

    /// Settings parsed but are not usable for a run.
    #[error("invalid experiment settings: {0}")]
    InvalidSettings(String),

    /// Raw frame ring would hold no frames.
    #[error("raw frame ring capacity must be non-zero")]
    EmptyRing,

    /// A module index outside the layout was addressed.
    #[error("module {module} out of range (detector has {modules} modules)")]
    ModuleOutOfRange {
        /// Requested module index.
        module: usize,
        /// Module count of the layout.
        modules: usize,
    },

    /// An opt-in polling deadline expired.
    #[error("timed out after {waited:?} waiting for {what}")]
    PollTimeout {
        /// What the poller was waiting for.
        what: &'static str,
        /// Elapsed time when the deadline fired.
        waited: Duration,
    },
}
