//! # jfstream
//!
//! Host-side frame transport for a tiled pixel detector: raw module frames
//! come in from capture, corrected composite images leave over RDMA.
//!
//! ## Crate Structure
//!
//! The building blocks live in the workspace crates:
//!
//! - **`jf-core`**: detector layout, experiment settings, capture counters,
//!   raw frame ring, availability tracking, polling.
//! - **`jf-pool`**: the registered composite buffer pool.
//! - **`jf-transform`**: geometry correction, gap expansion and summation.
//! - **`jf-transport`**: queue-pair abstraction, transmitter, completion
//!   reclaimer, loopback fabric, peer handshake.
//!
//! This crate wires them into a run:
//!
//! - **`trigger`**: trigger latch shared by all workers.
//! - **`gpu_gate`**: optional GPU stream slot handshake.
//! - **`pipeline`**: frame workers, reclaimer thread, run summary.
//! - **`capture`**: consumer cursor and the mock capture.
//! - **`simulate`**: full in-process session over localhost.
//! - **`config`** / **`telemetry`**: figment configuration and tracing setup.
//! - **`error`**: [`PipelineError`].

pub mod capture;
pub mod config;
pub mod error;
pub mod gpu_gate;
pub mod pipeline;
pub mod simulate;
pub mod telemetry;
pub mod trigger;

pub use config::JfConfig;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{GpuGateOptions, Pipeline, PipelineOptions, RunContext, RunSummary};
pub use simulate::{simulate, SimulationReport};
pub use trigger::{TriggerLatch, TriggerSynchronizer};
