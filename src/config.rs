//! Configuration using Figment.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults
//! 2. a TOML file (`config/jfstream.toml` by default)
//! 3. environment variables prefixed `JFSTREAM_`, with `__` between
//!    section and key: `JFSTREAM_RECEIVER__WORKERS=8`
//!
//! # Example
//! ```no_run
//! use jfstream::config::JfConfig;
//!
//! let config = JfConfig::load().unwrap();
//! config.validate().unwrap();
//! println!("{} workers", config.receiver.workers);
//! ```

use crate::capture::MockCaptureConfig;
use crate::pipeline::{min_ring_frames, GpuGateOptions, PipelineOptions};
use crate::telemetry::{parse_log_level, OutputFormat};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use jf_core::limits::{AVAILABILITY_POLL_INTERVAL, DEFAULT_SEND_QUEUE_DEPTH};
use jf_core::{ConversionMode, DetectorLayout, ExperimentSettings, PixelDepth};
use jf_transport::SubmitErrorPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/jfstream.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "JFSTREAM_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JfConfig {
    /// Local receiver settings.
    pub receiver: ReceiverConfig,
    /// Experiment settings used by `simulate` in place of the peer's.
    pub experiment: ExperimentSettings,
    /// Mock capture.
    pub simulation: MockCaptureConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl Default for JfConfig {
    fn default() -> Self {
        Self {
            receiver: ReceiverConfig::default(),
            experiment: ExperimentSettings {
                conversion_mode: ConversionMode::Converted,
                pixel_depth: PixelDepth::Two,
                summation: 1,
                nframes_to_collect: 1000,
                nframes_to_write: 500,
                pedestal_g0_frames: 0,
            },
            simulation: MockCaptureConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Receiver-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Detector modules (even, at least 2).
    pub modules: usize,
    /// Frame worker threads.
    pub workers: usize,
    /// Send queue depth; the buffer pool holds this many 2-byte images.
    pub send_queue_depth: usize,
    /// Raw frames the capture ring holds.
    pub raw_ring_frames: usize,
    /// Port the peer connects to.
    pub tcp_port: u16,
    /// Timeout for each step of the peer handshake.
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Give up on the trigger after this long; unset waits forever.
    #[serde(with = "humantime_serde")]
    pub trigger_timeout: Option<Duration>,
    /// Give up on a source frame after this long; unset waits forever.
    #[serde(with = "humantime_serde")]
    pub source_timeout: Option<Duration>,
    /// Sleep between source readiness probes.
    #[serde(with = "humantime_serde")]
    pub availability_poll: Duration,
    /// Handling of rejected sends.
    pub submit_error_policy: SubmitErrorPolicy,
    /// GPU stream gate.
    pub gpu: GpuConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            modules: 4,
            workers: 4,
            send_queue_depth: DEFAULT_SEND_QUEUE_DEPTH,
            raw_ring_frames: 64,
            tcp_port: 52_320,
            handshake_timeout: Duration::from_secs(10),
            trigger_timeout: None,
            source_timeout: None,
            availability_poll: AVAILABILITY_POLL_INTERVAL,
            submit_error_policy: SubmitErrorPolicy::FailFast,
            gpu: GpuConfig::default(),
        }
    }
}

/// GPU stream gate settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Gate frame workers on GPU stream slots.
    pub enabled: bool,
    /// Slot geometry.
    #[serde(flatten)]
    pub gate: GpuGateOptions,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error.
    pub level: String,
    /// pretty, compact or json.
    pub format: OutputFormat,
    /// Log span open and close.
    pub span_events: bool,
    /// Include source locations.
    pub file_and_line: bool,
    /// Include thread names.
    pub thread_names: bool,
    /// Colour pretty output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: OutputFormat::Pretty,
            span_events: false,
            file_and_line: false,
            thread_names: true,
            ansi: true,
        }
    }
}

impl JfConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The layered provider, for callers that merge further sources.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check constraints serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        let receiver = &self.receiver;

        DetectorLayout::new(receiver.modules).map_err(|e| e.to_string())?;
        if receiver.workers == 0 {
            return Err("receiver.workers must be > 0".into());
        }
        if receiver.send_queue_depth < 2 {
            return Err(format!(
                "receiver.send_queue_depth {} must be at least 2",
                receiver.send_queue_depth
            ));
        }

        self.experiment.validate().map_err(|e| e.to_string())?;
        let min_ring = min_ring_frames(self.experiment.summation);
        if (receiver.raw_ring_frames as u64) < min_ring {
            return Err(format!(
                "receiver.raw_ring_frames {} too small for summation {}, need at least {min_ring}",
                receiver.raw_ring_frames, self.experiment.summation
            ));
        }

        if receiver.gpu.enabled && (receiver.gpu.gate.streams == 0 || receiver.gpu.gate.frames_per_stream == 0) {
            return Err("receiver.gpu needs non-zero streams and frames_per_stream".into());
        }

        if self.simulation.trigger_at < self.experiment.pedestal_g0_frames {
            return Err(format!(
                "simulation.trigger_at {} is below experiment.pedestal_g0_frames {}; the trigger would never be accepted",
                self.simulation.trigger_at, self.experiment.pedestal_g0_frames
            ));
        }
        if self.simulation.spread < 0 {
            return Err("simulation.spread must not be negative".into());
        }

        parse_log_level(&self.logging.level)?;
        Ok(())
    }

    /// Detector layout for the configured module count.
    pub fn layout(&self) -> Result<DetectorLayout, String> {
        DetectorLayout::new(self.receiver.modules).map_err(|e| e.to_string())
    }

    /// Pipeline options from the receiver section.
    #[must_use]
    pub fn pipeline_options(&self) -> PipelineOptions {
        let receiver = &self.receiver;
        PipelineOptions {
            workers: receiver.workers,
            trigger_deadline: receiver.trigger_timeout,
            source_deadline: receiver.source_timeout,
            availability_poll: receiver.availability_poll,
            submit_policy: receiver.submit_error_policy,
            gpu: receiver.gpu.enabled.then_some(receiver.gpu.gate),
        }
    }
}
