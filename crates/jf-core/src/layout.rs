//! Detector geometry.
//!
//! A module is 512 lines of 1024 pixels read out by four 256-column chips
//! per line (eight chips per module). Chips are separated by physical gaps
//! that are one pixel wider than the readout suggests, so the composite
//! image widens each module line to 1030 pixels and each module to 514
//! lines. Modules are arranged two per output row band, bottom-up.

use crate::error::{CoreError, CoreResult};
use crate::settings::PixelDepth;

/// Lines per module in the raw readout.
pub const MODULE_LINES: usize = 512;
/// Pixels per module line in the raw readout.
pub const MODULE_COLS: usize = 1024;
/// Pixels per module in the raw readout.
pub const MODULE_PIXELS: usize = MODULE_LINES * MODULE_COLS;
/// Columns read out by a single chip.
pub const CHIP_COLS: usize = 256;
/// Chips across one module line.
pub const CHIPS_PER_LINE: usize = MODULE_COLS / CHIP_COLS;
/// Last line of the lower sensor half; it and the next line straddle the row gap.
pub const ROW_GAP_LINE: usize = 255;
/// Lines per module after row-gap expansion.
pub const OUTPUT_MODULE_LINES: usize = 514;
/// Pixels per module line after column-gap expansion.
pub const OUTPUT_MODULE_COLS: usize = 1030;
/// Modules sharing one output row band.
pub const MODULES_PER_ROW: usize = 2;
/// Width of the composite image in pixels.
pub const COMPOSITE_WIDTH: usize = OUTPUT_MODULE_COLS * MODULES_PER_ROW;

/// Module arrangement of the detector. Fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorLayout {
    modules: usize,
}

impl DetectorLayout {
    /// Create a layout for `modules` modules.
    ///
    /// Fails unless `modules` is even and non-zero.
    pub fn new(modules: usize) -> CoreResult<Self> {
        if modules == 0 || modules % MODULES_PER_ROW != 0 {
            return Err(CoreError::InvalidLayout { modules });
        }
        Ok(Self { modules })
    }

    /// Number of modules.
    #[must_use]
    pub fn modules(&self) -> usize {
        self.modules
    }

    /// Pixels in one raw frame (all modules).
    #[must_use]
    pub fn raw_frame_pixels(&self) -> usize {
        self.modules * MODULE_PIXELS
    }

    /// Bytes in one raw frame; raw pixels are always 16 bit.
    #[must_use]
    pub fn raw_frame_bytes(&self) -> usize {
        self.raw_frame_pixels() * std::mem::size_of::<i16>()
    }

    /// Pixels in the geometry-corrected composite image.
    #[must_use]
    pub fn composite_pixels(&self) -> usize {
        OUTPUT_MODULE_LINES * OUTPUT_MODULE_COLS * self.modules
    }

    /// Rows of the composite image.
    #[must_use]
    pub fn composite_height(&self) -> usize {
        OUTPUT_MODULE_LINES * self.modules / MODULES_PER_ROW
    }

    /// Columns of the composite image.
    #[must_use]
    pub fn composite_width(&self) -> usize {
        COMPOSITE_WIDTH
    }

    /// Bytes of a composite image at the given pixel depth.
    #[must_use]
    pub fn composite_bytes(&self, depth: PixelDepth) -> usize {
        self.composite_pixels() * depth.bytes()
    }

    /// Check that `module` addresses a module of this layout.
    pub fn check_module(&self, module: usize) -> CoreResult<()> {
        if module >= self.modules {
            return Err(CoreError::ModuleOutOfRange {
                module,
                modules: self.modules,
            });
        }
        Ok(())
    }
}
