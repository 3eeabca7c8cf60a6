// src/geometry/pack.rs
// Flattened line-segment form of a geometry as consumed by the compute kernels.
// This file exists to pack shapes into interleaved points plus per-segment shape info with loop sentinels.
// RELEVANT FILES:src/geometry/mod.rs,src/histopyramid/kernels.rs,src/shaders/common.wgsl

use glam::Vec2;

use super::{Bounds, Shape};

/// Packed polygon loops.
///
/// Segment `k` runs from point `k` to the next point of its loop. `shape_info[k]`
/// holds the owning shape index, except on the last segment of every loop where
/// it stores `-loop_length`. Holes are packed as extra loops of their shape, so
/// all segments of one shape are contiguous.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapePack {
    pub points: Vec<f32>,
    pub shape_info: Vec<i32>,
    pub min: Vec2,
    pub max: Vec2,
}

impl ShapePack {
    pub fn pack(geometry: &[Shape]) -> Self {
        let mut pack = ShapePack::default();
        let mut bounds: Option<Bounds> = None;

        for (shape_index, shape) in geometry.iter().enumerate() {
            let loops = std::iter::once(shape.outline()).chain(shape.holes.iter().cloned());
            for ring in loops.filter(|ring| !ring.is_empty()) {
                for &p in &ring {
                    pack.points.extend_from_slice(&[p.x, p.y]);
                    pack.shape_info.push(shape_index as i32);
                }
                if let Some(last) = pack.shape_info.last_mut() {
                    *last = -(ring.len() as i32);
                }
                bounds = Bounds::merge(bounds, Bounds::from_points(ring.iter().copied()));
            }
        }

        if let Some(bounds) = bounds {
            pack.min = bounds.min;
            pack.max = bounds.max;
        }
        pack
    }

    pub fn line_count(&self) -> usize {
        self.shape_info.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shape_info.is_empty()
    }

    /// Largest x coordinate, the reference for horizontal ray casting.
    pub fn max_x(&self) -> f32 {
        self.max.x
    }

    #[inline]
    pub fn point(&self, index: usize) -> Vec2 {
        Vec2::new(self.points[index * 2], self.points[index * 2 + 1])
    }

    /// Index of the point that ends segment `index`.
    #[inline]
    pub fn successor(&self, index: usize) -> usize {
        let info = self.shape_info[index];
        if info < 0 {
            index + 1 - (-info) as usize
        } else {
            index + 1
        }
    }

    /// Start and end of segment `index`.
    #[inline]
    pub fn line(&self, index: usize) -> (Vec2, Vec2) {
        (self.point(index), self.point(self.successor(index)))
    }

    /// Owning shape of segment `index`; `-1` for a single-point loop.
    #[inline]
    pub fn shape_of(&self, index: usize) -> i32 {
        let info = self.shape_info[index];
        if info >= 0 {
            info
        } else if info < -1 && index > 0 {
            self.shape_info[index - 1]
        } else {
            -1
        }
    }

    /// Lengths of the packed loops, read back from the sentinels.
    pub fn loop_lengths(&self) -> Vec<usize> {
        self.shape_info
            .iter()
            .filter(|&&info| info < 0)
            .map(|&info| (-info) as usize)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_shapes() -> Vec<Shape> {
        vec![
            Shape::square(Vec2::ZERO, 1.0),
            Shape::new(vec![Vec2::new(5.0, 0.0), Vec2::new(6.0, 0.0), Vec2::new(5.0, 1.0)]),
        ]
    }

    #[test]
    fn test_sentinels_match_loop_lengths() {
        let pack = ShapePack::pack(&two_shapes());
        assert_eq!(pack.shape_info, vec![0, 0, 0, -4, 1, 1, -3]);
        assert_eq!(pack.loop_lengths(), vec![4, 3]);
        assert_eq!(pack.loop_lengths().iter().sum::<usize>(), pack.line_count());
    }

    #[test]
    fn test_successor_wraps_loops() {
        let pack = ShapePack::pack(&two_shapes());
        assert_eq!(pack.successor(0), 1);
        assert_eq!(pack.successor(3), 0);
        assert_eq!(pack.successor(6), 4);
        assert_eq!(pack.line(6), (Vec2::new(5.0, 1.0), Vec2::new(5.0, 0.0)));
    }

    #[test]
    fn test_shape_of_reads_through_sentinel() {
        let pack = ShapePack::pack(&two_shapes());
        assert_eq!(pack.shape_of(3), 0);
        assert_eq!(pack.shape_of(6), 1);
    }

    #[test]
    fn test_holes_share_shape_index() {
        let shape = Shape::square(Vec2::ZERO, 2.0).with_hole(vec![
            Vec2::new(-1.0, -1.0),
            Vec2::new(-1.0, 1.0),
            Vec2::new(1.0, 1.0),
        ]);
        let pack = ShapePack::pack(&[shape]);
        assert_eq!(pack.shape_info, vec![0, 0, 0, -4, 0, 0, -3]);
        assert_eq!(pack.shape_of(6), 0);
        assert_eq!(pack.max_x(), 2.0);
        assert_eq!(pack.min, Vec2::splat(-2.0));
    }
}
