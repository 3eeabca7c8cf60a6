//! HistoPyramid layout, reduction and traversal.
//!
//! The base is a `2^L × 2^L` grid of `(angle, value)` cells. Level `k` is a
//! `2^k × 2^k` grid of survivor counts; levels `L-1` down to `2` live in the
//! middle buffer (level `L-1` first), level 1 is the fixed 2×2 top. Each cell
//! of level `k` sums the 2×2 block below it, children visited in the order
//! `(0,0) (1,0) (0,1) (1,1)`.

use rayon::prelude::*;

use crate::config::{MAX_LAYERS, MIN_LAYERS};
use crate::geometry::relation::NO_VALUE;

/// Size bookkeeping for one pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidLayout {
    pub layers: u32,
}

impl PyramidLayout {
    /// `clamp(ceil(log2(n)), 4, max_layers)`.
    pub fn for_line_count(line_count: u32, max_layers: u32) -> Self {
        let wanted = u32::BITS - line_count.max(1).saturating_sub(1).leading_zeros();
        let cap = max_layers.clamp(MIN_LAYERS, MAX_LAYERS);
        Self {
            layers: wanted.clamp(MIN_LAYERS, cap),
        }
    }

    pub fn base_width(&self) -> u32 {
        1 << self.layers
    }

    pub fn base_cells(&self) -> u64 {
        1u64 << (2 * self.layers)
    }

    /// Allocated length of the middle buffer, `(4^L - 1) / 3`.
    pub fn middle_len(&self) -> usize {
        ((1usize << (2 * self.layers)) - 1) / 3
    }

    /// Offset of level `level` (2 ≤ level < L) in the middle buffer.
    pub fn level_offset(&self, level: u32) -> usize {
        ((level + 1)..self.layers).map(|j| 1usize << (2 * j)).sum()
    }

    pub fn level_width(level: u32) -> u32 {
        1 << level
    }
}

/// Survivor predicate applied to every base cell.
#[inline]
pub fn is_survivor(cell: [f32; 2]) -> bool {
    let [angle, value] = cell;
    (0.0..1.0).contains(&value) && angle <= std::f32::consts::TAU
}

/// Host-resident pyramid buffers.
#[derive(Debug, Clone)]
pub struct HostPyramid {
    pub layout: PyramidLayout,
    pub base: Vec<[f32; 2]>,
    pub middle: Vec<u32>,
    pub top: [u32; 4],
}

impl HostPyramid {
    pub fn new(layout: PyramidLayout) -> Self {
        Self {
            layout,
            base: vec![[0.0, NO_VALUE]; layout.base_cells() as usize],
            middle: vec![0; layout.middle_len()],
            top: [0; 4],
        }
    }

    /// Bottom-up 4:1 reduction. Returns the survivor count summed from the top.
    pub fn build(&mut self) -> u32 {
        let layers = self.layout.layers;
        for level in (1..layers).rev() {
            let width = PyramidLayout::level_width(level);
            let counts: Vec<u32> = (0..width * width)
                .into_par_iter()
                .map(|index| {
                    let (x, y) = (index % width, index / width);
                    children(x, y)
                        .iter()
                        .map(|&(cx, cy)| self.count(level + 1, cx, cy))
                        .sum()
                })
                .collect();
            if level == 1 {
                self.top.copy_from_slice(&counts);
            } else {
                let offset = self.layout.level_offset(level);
                self.middle[offset..offset + counts.len()].copy_from_slice(&counts);
            }
        }
        self.survivor_count()
    }

    pub fn survivor_count(&self) -> u32 {
        self.top.iter().sum()
    }

    /// Count stored for cell `(x, y)` of `level`; the base level yields 0 or 1.
    pub fn count(&self, level: u32, x: u32, y: u32) -> u32 {
        let width = PyramidLayout::level_width(level);
        match level {
            1 => self.top[(y * width + x) as usize],
            l if l == self.layout.layers => is_survivor(self.base[(y * width + x) as usize]) as u32,
            l => self.middle[self.layout.level_offset(l) + (y * width + x) as usize],
        }
    }

    /// Top-down walk locating the base cell of the `k`-th survivor.
    pub fn traverse(&self, mut k: u32) -> Option<u32> {
        let (mut x, mut y) = (0u32, 0u32);
        for level in 1..=self.layout.layers {
            let mut found = false;
            for (cx, cy) in children(x, y) {
                let count = self.count(level, cx, cy);
                if k < count {
                    x = cx;
                    y = cy;
                    found = true;
                    break;
                }
                k -= count;
            }
            if !found {
                return None;
            }
        }
        Some(y * self.layout.base_width() + x)
    }
}

#[inline]
fn children(x: u32, y: u32) -> [(u32, u32); 4] {
    [
        (2 * x, 2 * y),
        (2 * x + 1, 2 * y),
        (2 * x, 2 * y + 1),
        (2 * x + 1, 2 * y + 1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_clamping() {
        assert_eq!(PyramidLayout::for_line_count(1, 40).layers, 4);
        assert_eq!(PyramidLayout::for_line_count(16, 40).layers, 4);
        assert_eq!(PyramidLayout::for_line_count(17, 40).layers, 5);
        assert_eq!(PyramidLayout::for_line_count(1 << 20, 40).layers, 20);
        assert_eq!(PyramidLayout::for_line_count(1 << 20, 11).layers, 11);
    }

    #[test]
    fn test_level_offsets_fit_middle() {
        let layout = PyramidLayout { layers: 5 };
        assert_eq!(layout.level_offset(4), 0);
        assert_eq!(layout.level_offset(3), 256);
        assert_eq!(layout.level_offset(2), 256 + 64);
        assert!(layout.level_offset(2) + 16 <= layout.middle_len());
    }

    #[test]
    fn test_predicate() {
        assert!(is_survivor([0.0, 0.0]));
        assert!(is_survivor([1.0, 0.5]));
        assert!(!is_survivor([0.0, NO_VALUE]));
        assert!(!is_survivor([0.0, 1.0]));
        assert!(!is_survivor([0.5 + 4.0 * std::f32::consts::PI, 0.5]));
    }

    #[test]
    fn test_traverse_visits_survivors_in_order() {
        let mut pyramid = HostPyramid::new(PyramidLayout { layers: 4 });
        let marked = [3usize, 17, 18, 200, 255];
        for &index in &marked {
            pyramid.base[index] = [0.0, 0.25];
        }
        assert_eq!(pyramid.build(), marked.len() as u32);

        let mut found: Vec<u32> = (0..marked.len() as u32)
            .map(|k| pyramid.traverse(k).unwrap())
            .collect();
        assert_eq!(pyramid.traverse(marked.len() as u32), None);
        found.sort_unstable();
        assert_eq!(found, marked.iter().map(|&i| i as u32).collect::<Vec<_>>());
    }
}
