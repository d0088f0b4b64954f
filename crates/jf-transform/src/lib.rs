//! Frame transform engine.
//!
//! Turns raw per-module readouts into the composite image sent downstream.
//! The transform is chosen once per run from the experiment settings:
//!
//! | mode      | summation | output                         |
//! |-----------|-----------|--------------------------------|
//! | raw       | any       | raw frame bytes, unchanged     |
//! | converted | 1         | 16-bit geometry-corrected      |
//! | converted | >= 2      | 32-bit summed, then corrected  |
//!
//! Every transform is a pure function of its source frames; the destination
//! is fully overwritten, so a reused buffer never leaks a previous frame.
//!
//! # Example
//!
//! ```
//! use jf_core::DetectorLayout;
//! use jf_transform::Transform;
//!
//! let layout = DetectorLayout::new(2).unwrap();
//! let source = vec![0i16; layout.raw_frame_pixels()];
//! let mut words = vec![0u32; layout.composite_pixels()];
//! let written = Transform::Corrected
//!     .apply(&layout, &[&source], bytemuck::cast_slice_mut(&mut words))
//!     .unwrap();
//! assert_eq!(written, layout.composite_pixels() * 2);
//! ```

pub mod error;
pub mod expand;
pub mod geometry;
pub mod pixel;

pub use error::TransformError;
pub use geometry::{module_layout, LineTarget, ModulePlacement};
pub use pixel::{accumulate, GapPixel, BAD_SENTINEL, OVERLOAD_SENTINEL};

use jf_core::layout::{MODULE_COLS, MODULE_LINES};
use jf_core::{ConversionMode, DetectorLayout, ExperimentSettings, PixelDepth};

/// Transform applied to every frame of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Send the raw frame as captured.
    Raw,
    /// Geometry-correct a single frame into 16-bit pixels.
    Corrected,
    /// Sum consecutive frames into 32-bit pixels, then geometry-correct.
    Summed {
        /// Source frames per output frame, at least 2.
        frames: u32,
    },
}

impl Transform {
    /// Pick the transform for a run.
    pub fn select(settings: &ExperimentSettings) -> Result<Self, TransformError> {
        match settings.conversion_mode {
            ConversionMode::Quit => Err(TransformError::QuitSession),
            ConversionMode::Raw => Ok(Self::Raw),
            ConversionMode::Converted if settings.summation <= 1 => Ok(Self::Corrected),
            ConversionMode::Converted => Ok(Self::Summed {
                frames: settings.summation,
            }),
        }
    }

    /// Raw frames consumed per output frame.
    #[must_use]
    pub fn source_frames(&self) -> usize {
        match self {
            Self::Raw | Self::Corrected => 1,
            Self::Summed { frames } => *frames as usize,
        }
    }

    /// Output pixel depth, `None` for raw passthrough.
    #[must_use]
    pub fn output_depth(&self) -> Option<PixelDepth> {
        match self {
            Self::Raw => None,
            Self::Corrected => Some(PixelDepth::Two),
            Self::Summed { .. } => Some(PixelDepth::Four),
        }
    }

    /// Bytes written per output frame.
    #[must_use]
    pub fn payload_bytes(&self, layout: &DetectorLayout) -> usize {
        match self.output_depth() {
            None => layout.raw_frame_bytes(),
            Some(depth) => layout.composite_bytes(depth),
        }
    }

    /// Build one output frame into `dest` and return the payload length.
    ///
    /// `sources` must hold exactly [`source_frames`](Self::source_frames)
    /// raw frames in capture order. `dest` must be at least
    /// [`payload_bytes`](Self::payload_bytes) long and aligned for the output
    /// pixel type.
    pub fn apply(
        &self,
        layout: &DetectorLayout,
        sources: &[&[i16]],
        dest: &mut [u8],
    ) -> Result<usize, TransformError> {
        if sources.len() != self.source_frames() {
            return Err(TransformError::SourceCount {
                expected: self.source_frames(),
                got: sources.len(),
            });
        }
        if let Some(bad) = sources.iter().find(|s| s.len() != layout.raw_frame_pixels()) {
            return Err(TransformError::SourceSize {
                expected: layout.raw_frame_pixels(),
                got: bad.len(),
            });
        }
        let payload = self.payload_bytes(layout);
        if dest.len() < payload {
            return Err(TransformError::DestinationTooSmall {
                expected: payload,
                got: dest.len(),
            });
        }
        let dest = &mut dest[..payload];

        match self {
            Self::Raw => dest.copy_from_slice(bytemuck::cast_slice(sources[0])),
            Self::Corrected => {
                let pixels: &mut [i16] =
                    bytemuck::try_cast_slice_mut(dest).map_err(|_| TransformError::Misaligned(2))?;
                correct_frame(layout, sources[0], pixels);
            }
            Self::Summed { .. } => {
                let pixels: &mut [i32] =
                    bytemuck::try_cast_slice_mut(dest).map_err(|_| TransformError::Misaligned(4))?;
                sum_and_correct(layout, sources, pixels);
            }
        }
        Ok(payload)
    }
}

/// Offset of raw line `line` of `module` within a raw frame.
#[inline]
fn line_offset(module: usize, line: usize) -> usize {
    (module * MODULE_LINES + line) * MODULE_COLS
}

/// Geometry-correct one raw frame into a 16-bit composite image.
///
/// # Panics
/// Panics if `source` or `dest` is smaller than the layout requires.
pub fn correct_frame(layout: &DetectorLayout, source: &[i16], dest: &mut [i16]) {
    for module in 0..layout.modules() {
        let placement = geometry::placement(layout, module);
        for line in 0..MODULE_LINES {
            let at = line_offset(module, line);
            expand::place_line(dest, &placement, line, &source[at..at + MODULE_COLS]);
        }
    }
}

/// Sum `sources` with sticky saturation and geometry-correct the sums into
/// a 32-bit composite image.
///
/// # Panics
/// Panics if a source or `dest` is smaller than the layout requires.
pub fn sum_and_correct(layout: &DetectorLayout, sources: &[&[i16]], dest: &mut [i32]) {
    let mut sums = vec![0i32; MODULE_COLS];
    for module in 0..layout.modules() {
        let placement = geometry::placement(layout, module);
        for line in 0..MODULE_LINES {
            let at = line_offset(module, line);
            sums.fill(0);
            for source in sources {
                accumulate(&mut sums, &source[at..at + MODULE_COLS]);
            }
            expand::place_line(dest, &placement, line, &sums);
        }
    }
}
