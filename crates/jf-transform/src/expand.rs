//! Chip-gap expansion of single module lines.
//!
//! A raw line of 1024 pixels becomes 1030 output pixels: each of the three
//! chip boundaries gains two columns. The two edge pixels of a boundary are
//! split evenly over the four output columns around it.
//!
//! ```text
//! raw:     ... 254 | 255 256 | 257 ...
//! output:  ... 254 | 255/2 255/2 256/2 256/2 | 257 ...
//! ```

use crate::geometry::{LineTarget, ModulePlacement};
use crate::pixel::GapPixel;
use jf_core::layout::{CHIPS_PER_LINE, CHIP_COLS, COMPOSITE_WIDTH, MODULE_COLS, OUTPUT_MODULE_COLS};

/// Output columns per chip including its share of the gaps.
const CHIP_STRIDE: usize = CHIP_COLS + 2;

/// Raw columns of `chip` copied verbatim; the others border a gap.
#[inline]
fn interior_span(chip: usize) -> std::ops::Range<usize> {
    let first = usize::from(chip != 0);
    let last = if chip == CHIPS_PER_LINE - 1 {
        CHIP_COLS
    } else {
        CHIP_COLS - 1
    };
    first..last
}

/// Expand one raw line into one output line.
///
/// `dest` must hold at least 1030 pixels and `src` at least 1024.
pub fn expand_line<P: GapPixel>(dest: &mut [P], src: &[P]) {
    let dest = &mut dest[..OUTPUT_MODULE_COLS];
    let src = &src[..MODULE_COLS];

    for chip in 0..CHIPS_PER_LINE {
        let base = chip * CHIP_STRIDE;
        for col in interior_span(chip) {
            dest[base + col] = src[chip * CHIP_COLS + col];
        }
    }

    for gap in 0..CHIPS_PER_LINE - 1 {
        let left = src[CHIP_COLS - 1 + gap * CHIP_COLS].halve();
        let right = src[CHIP_COLS + gap * CHIP_COLS].halve();
        let at = CHIP_COLS - 1 + gap * CHIP_STRIDE;
        dest[at..at + 4].copy_from_slice(&[left, left, right, right]);
    }
}

/// Expand one raw line that straddles the row gap into two output lines.
///
/// Interior pixels are halved into both lines; gap pixels are quartered
/// into four locations.
pub fn expand_split_line<P: GapPixel>(upper: &mut [P], lower: &mut [P], src: &[P]) {
    let upper = &mut upper[..OUTPUT_MODULE_COLS];
    let lower = &mut lower[..OUTPUT_MODULE_COLS];
    let src = &src[..MODULE_COLS];

    for chip in 0..CHIPS_PER_LINE {
        let base = chip * CHIP_STRIDE;
        for col in interior_span(chip) {
            let value = src[chip * CHIP_COLS + col].halve();
            upper[base + col] = value;
            lower[base + col] = value;
        }
    }

    for gap in 0..CHIPS_PER_LINE - 1 {
        let left = src[CHIP_COLS - 1 + gap * CHIP_COLS].quarter();
        let right = src[CHIP_COLS + gap * CHIP_COLS].quarter();
        let at = CHIP_COLS - 1 + gap * CHIP_STRIDE;
        upper[at..at + 4].copy_from_slice(&[left, left, right, right]);
        lower[at..at + 4].copy_from_slice(&[left, left, right, right]);
    }
}

/// Write raw line `line` of a module into the composite image `dest`.
pub fn place_line<P: GapPixel>(
    dest: &mut [P],
    placement: &ModulePlacement,
    line: usize,
    src: &[P],
) {
    match placement.line_target(line) {
        LineTarget::Single(row) => {
            let at = placement.pixel_index(row, 0);
            expand_line(&mut dest[at..at + OUTPUT_MODULE_COLS], src);
        }
        LineTarget::Double { upper } => {
            let (head, tail) = dest.split_at_mut((upper + 1) * COMPOSITE_WIDTH);
            let at = placement.pixel_index(upper, 0);
            let lower_at = placement.column_offset;
            expand_split_line(
                &mut head[at..at + OUTPUT_MODULE_COLS],
                &mut tail[lower_at..lower_at + OUTPUT_MODULE_COLS],
                src,
            );
        }
    }
}
