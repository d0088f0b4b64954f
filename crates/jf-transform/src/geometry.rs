//! Module placement in the composite image.
//!
//! Modules pair up two per output row band; module `m` occupies band
//! `m / 2` and the left or right half by `m % 2`. Bands are stacked
//! bottom-up and each module is flipped vertically: raw line 0 lands on the
//! band's bottom row. Raw lines 255 and 256 straddle the row gap and each
//! fill two output rows.

use jf_core::layout::{
    COMPOSITE_WIDTH, MODULES_PER_ROW, OUTPUT_MODULE_COLS, OUTPUT_MODULE_LINES, ROW_GAP_LINE,
};
use jf_core::{CoreResult, DetectorLayout};

/// Where one module lands in the composite image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModulePlacement {
    /// Output row receiving raw line 0.
    pub bottom_row: usize,
    /// First output column of the module.
    pub column_offset: usize,
}

/// Output rows written for one raw line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTarget {
    /// The line fills one row.
    Single(usize),
    /// The line fills rows `upper` and `upper + 1`.
    Double {
        /// Lower-indexed of the two rows.
        upper: usize,
    },
}

/// Destination geometry of `module`.
///
/// Pure function of the module index and the layout. Fails with
/// [`CoreError::ModuleOutOfRange`](jf_core::CoreError::ModuleOutOfRange) if
/// `module` is not part of `layout`.
pub fn module_layout(layout: &DetectorLayout, module: usize) -> CoreResult<ModulePlacement> {
    layout.check_module(module)?;
    Ok(placement(layout, module))
}

/// Placement of a module already known to be in range.
pub(crate) fn placement(layout: &DetectorLayout, module: usize) -> ModulePlacement {
    let band_top = (module / MODULES_PER_ROW) * OUTPUT_MODULE_LINES;
    ModulePlacement {
        bottom_row: layout.composite_height() - band_top - 1,
        column_offset: (module % MODULES_PER_ROW) * OUTPUT_MODULE_COLS,
    }
}

impl ModulePlacement {
    /// Top output row of the module.
    #[must_use]
    pub fn top_row(&self) -> usize {
        self.bottom_row + 1 - OUTPUT_MODULE_LINES
    }

    /// Output row(s) for raw line `line`.
    #[must_use]
    pub fn line_target(&self, line: usize) -> LineTarget {
        match line {
            l if l < ROW_GAP_LINE => LineTarget::Single(self.bottom_row - l),
            ROW_GAP_LINE => LineTarget::Double {
                upper: self.bottom_row - ROW_GAP_LINE - 1,
            },
            l if l == ROW_GAP_LINE + 1 => LineTarget::Double {
                upper: self.bottom_row - ROW_GAP_LINE - 3,
            },
            l => LineTarget::Single(self.bottom_row - l - 2),
        }
    }

    /// Index of output pixel (`row`, `column_offset + col`) in the composite.
    #[inline]
    #[must_use]
    pub fn pixel_index(&self, row: usize, col: usize) -> usize {
        row * COMPOSITE_WIDTH + self.column_offset + col
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jf_core::layout::MODULE_LINES;
    use std::collections::HashSet;

    fn four() -> DetectorLayout {
        DetectorLayout::new(4).unwrap()
    }

    #[test]
    fn modules_pair_up_and_stack_bottom_up() {
        let layout = four();
        assert_eq!(
            module_layout(&layout, 0).unwrap(),
            ModulePlacement {
                bottom_row: 1027,
                column_offset: 0
            }
        );
        assert_eq!(module_layout(&layout, 1).unwrap().column_offset, 1030);
        assert_eq!(module_layout(&layout, 1).unwrap().bottom_row, 1027);
        assert_eq!(module_layout(&layout, 2).unwrap().bottom_row, 513);
        assert_eq!(module_layout(&layout, 3).unwrap().top_row(), 0);
        assert_eq!(module_layout(&layout, 0).unwrap().top_row(), 514);
    }

    #[test]
    fn row_gap_lines_fill_two_rows() {
        let placement = module_layout(&four(), 0).unwrap();
        assert_eq!(placement.line_target(0), LineTarget::Single(1027));
        assert_eq!(placement.line_target(254), LineTarget::Single(773));
        assert_eq!(placement.line_target(255), LineTarget::Double { upper: 771 });
        assert_eq!(placement.line_target(256), LineTarget::Double { upper: 769 });
        assert_eq!(placement.line_target(257), LineTarget::Single(768));
        assert_eq!(placement.line_target(511), LineTarget::Single(514));
    }

    #[test]
    fn every_module_row_written_exactly_once() {
        let layout = four();
        for module in 0..layout.modules() {
            let placement = module_layout(&layout, module).unwrap();
            let mut rows = Vec::new();
            for line in 0..MODULE_LINES {
                match placement.line_target(line) {
                    LineTarget::Single(row) => rows.push(row),
                    LineTarget::Double { upper } => rows.extend([upper, upper + 1]),
                }
            }
            let unique: HashSet<_> = rows.iter().copied().collect();
            assert_eq!(rows.len(), OUTPUT_MODULE_LINES);
            assert_eq!(unique.len(), OUTPUT_MODULE_LINES);
            assert_eq!(*unique.iter().min().unwrap(), placement.top_row());
            assert_eq!(*unique.iter().max().unwrap(), placement.bottom_row);
        }
    }

    #[test]
    fn module_outside_layout_is_an_error() {
        assert_eq!(
            module_layout(&four(), 4),
            Err(jf_core::CoreError::ModuleOutOfRange { module: 4, modules: 4 })
        );
    }

    #[test]
    fn placement_is_pure() {
        let layout = four();
        assert_eq!(module_layout(&layout, 2).unwrap(), module_layout(&layout, 2).unwrap());
    }
}
