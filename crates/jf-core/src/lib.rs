//! Core types shared by every stage of the jfstream frame-transport pipeline.
//!
//! The capture hardware writes raw module frames into a [`RawFrameRing`] and
//! advances per-module head counters in [`OnlineStatistics`]. Everything in
//! this crate is either immutable for the lifetime of a run
//! ([`DetectorLayout`], [`ExperimentSettings`]) or safe to read concurrently
//! from any number of worker threads.
//!
//! # Modules
//!
//! - [`layout`]: module geometry constants and the composite image size
//! - [`settings`]: per-run experiment settings exchanged with the peer
//! - [`stats`]: capture-side production counters
//! - [`availability`]: "slowest module" frame availability tracker
//! - [`ring`]: raw frame ring written by capture, read by workers
//! - [`poll`]: bounded-latency polling primitive with optional deadline
//! - [`limits`]: poll intervals and other timing constants

pub mod availability;
pub mod error;
pub mod layout;
pub mod limits;
pub mod poll;
pub mod ring;
pub mod settings;
pub mod stats;

pub use availability::{Availability, FrameTracker};
pub use error::{CoreError, CoreResult};
pub use layout::DetectorLayout;
pub use poll::{poll_until, PollPolicy};
pub use ring::{RawFrameRef, RawFrameRing};
pub use settings::{ConversionMode, ExperimentSettings, PixelDepth};
pub use stats::OnlineStatistics;
