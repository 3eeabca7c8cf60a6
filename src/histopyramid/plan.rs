// src/histopyramid/plan.rs
// Tiling of the n×n relation matrix into outer batches that fit one pyramid base.
// This file exists to derive layer counts and batch plans and reject inputs that overflow the id space.
// RELEVANT FILES:src/histopyramid/pyramid.rs,src/histopyramid/mod.rs,src/config.rs

use serde::Serialize;

use super::pyramid::PyramidLayout;
use crate::error::{PolyError, PolyResult};

/// How the relation matrix is tiled into sequential passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    /// Row width of the matrix (power of two, at least the line count).
    pub width: u32,
    /// Rows handled per batch.
    pub height: u32,
    pub batch_count: u32,
}

impl BatchPlan {
    pub fn new(line_count: u32, layout: &PyramidLayout, min_width: u32) -> PolyResult<Self> {
        let width = line_count.max(1).next_power_of_two().max(min_width);
        let cells = layout.base_cells();
        if width as u64 > cells {
            return Err(PolyError::buffer(format!(
                "row width {} exceeds pyramid base of {} cells",
                width, cells
            )));
        }
        if line_count as u64 * width as u64 >= u32::MAX as u64 {
            return Err(PolyError::buffer(format!(
                "{} lines overflow the 32-bit segment id space",
                line_count
            )));
        }

        let height = ((cells / width as u64) as u32).min(width);
        let batch_count = (line_count + height - 1) / height;
        Ok(Self {
            width,
            height,
            batch_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_input_single_batch() {
        let layout = PyramidLayout::for_line_count(8, 11);
        let plan = BatchPlan::new(8, &layout, 16).unwrap();
        assert_eq!(plan.width, 16);
        assert_eq!(plan.height, 16);
        assert_eq!(plan.batch_count, 1);
    }

    #[test]
    fn test_capped_layers_force_batches() {
        // 4 layers: 256 base cells, 64-wide rows, 4 rows per batch
        let layout = PyramidLayout::for_line_count(40, 4);
        let plan = BatchPlan::new(40, &layout, 16).unwrap();
        assert_eq!(plan.width, 64);
        assert_eq!(plan.height, 4);
        assert_eq!(plan.batch_count, 10);
    }

    #[test]
    fn test_row_wider_than_base_rejected() {
        let layout = PyramidLayout::for_line_count(300, 4);
        let err = BatchPlan::new(300, &layout, 16).unwrap_err();
        assert!(matches!(err, PolyError::BufferContractViolation(_)));
    }
}
