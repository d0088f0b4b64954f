//! Per-run experiment settings.
//!
//! The downstream peer sends these during the endpoint handshake (or the
//! simulator loads them from configuration). They are validated once and
//! never mutated after the worker threads start.

use crate::error::{CoreError, CoreResult};
use crate::limits::MAX_SUMMATION;
use serde::{Deserialize, Serialize};

/// What the sender does with captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Copy raw module data without geometry correction.
    Raw,
    /// Geometry-correct (and optionally sum) frames into composite images.
    Converted,
    /// The peer only wants to end the session; no frames are sent.
    Quit,
}

/// Bytes per composite pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PixelDepth {
    /// Signed 16-bit pixels.
    Two,
    /// Signed 32-bit pixels (summed frames).
    Four,
}

impl PixelDepth {
    /// Size of one pixel in bytes.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            PixelDepth::Two => 2,
            PixelDepth::Four => 4,
        }
    }
}

impl TryFrom<u8> for PixelDepth {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(PixelDepth::Two),
            4 => Ok(PixelDepth::Four),
            other => Err(CoreError::InvalidSettings(format!(
                "pixel_depth must be 2 or 4, got {other}"
            ))),
        }
    }
}

impl From<PixelDepth> for u8 {
    fn from(depth: PixelDepth) -> Self {
        depth.bytes() as u8
    }
}

impl std::fmt::Display for PixelDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bytes", self.bytes())
    }
}

/// Settings describing one acquisition run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSettings {
    /// Raw passthrough, converted, or quit.
    pub conversion_mode: ConversionMode,
    /// Bytes per output pixel.
    pub pixel_depth: PixelDepth,
    /// Raw frames combined into one output frame.
    #[serde(default = "default_summation")]
    pub summation: u32,
    /// Raw frames the capture hardware records in total.
    pub nframes_to_collect: u64,
    /// Output frames to send downstream.
    pub nframes_to_write: u64,
    /// Frames recorded before the trigger can be accepted.
    #[serde(default)]
    pub pedestal_g0_frames: u64,
}

fn default_summation() -> u32 {
    1
}

impl ExperimentSettings {
    /// Validate semantic constraints that serde cannot express.
    ///
    /// Converted output is 16 bit without summation and 32 bit with it, so the
    /// pixel depth must agree with the summation factor in that mode.
    pub fn validate(&self) -> CoreResult<()> {
        if self.conversion_mode == ConversionMode::Quit {
            return Ok(());
        }
        if self.summation == 0 {
            return Err(CoreError::InvalidSettings(
                "summation must be at least 1".into(),
            ));
        }
        if self.summation > MAX_SUMMATION {
            return Err(CoreError::InvalidSettings(format!(
                "summation {} exceeds the maximum of {MAX_SUMMATION}",
                self.summation
            )));
        }
        if self.nframes_to_collect == 0 {
            return Err(CoreError::InvalidSettings(
                "nframes_to_collect must be non-zero".into(),
            ));
        }
        if self.conversion_mode == ConversionMode::Converted {
            let expected = if self.summation == 1 {
                PixelDepth::Two
            } else {
                PixelDepth::Four
            };
            if self.pixel_depth != expected {
                return Err(CoreError::InvalidSettings(format!(
                    "summation {} requires pixel_depth {}, got {}",
                    self.summation, expected, self.pixel_depth
                )));
            }
        }
        Ok(())
    }

    /// Absolute index of the first raw frame feeding output frame `frame`.
    #[must_use]
    pub fn collected_frame(&self, frame: u64, trigger_frame: u64) -> u64 {
        frame * u64::from(self.summation) + trigger_frame
    }

    /// Absolute index of the last raw frame feeding output frame `frame`.
    #[must_use]
    pub fn last_source_frame(&self, frame: u64, trigger_frame: u64) -> u64 {
        self.collected_frame(frame, trigger_frame) + u64::from(self.summation) - 1
    }

    /// Whether a trigger at `trigger_frame` leaves every output frame obtainable.
    #[must_use]
    pub fn trigger_fits(&self, trigger_frame: u64) -> bool {
        self.nframes_to_write * u64::from(self.summation) + trigger_frame <= self.nframes_to_collect
    }
}
