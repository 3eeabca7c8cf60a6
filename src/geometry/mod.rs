// src/geometry/mod.rs
// Polygon geometry model shared by the operation graph and the HistoPyramid engine.
// This file exists to define Shape/Geometry/Bounds and the orientation clean-up applied before packing.
// RELEVANT FILES:src/geometry/pack.rs,src/geometry/relation.rs,src/histopyramid/mod.rs

pub mod pack;
pub mod relation;

pub use pack::ShapePack;
pub use relation::{relate, LineRelation, Relation, NO_VALUE};

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::config::DISTANCE_TOLERANCE;

/// Ordered point list, the payload of `create` and the result of `intersection`.
pub type Points = Vec<Vec2>;

/// Ordered sequence of shapes.
pub type Geometry = Vec<Shape>;

/// A polygon outline with optional loop order and holes.
///
/// When `contour` is absent, `nodes` already is the closed loop order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub nodes: Vec<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contour: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holes: Vec<Vec<Vec2>>,
}

impl Shape {
    pub fn new(nodes: Vec<Vec2>) -> Self {
        Self {
            nodes,
            contour: None,
            holes: Vec::new(),
        }
    }

    /// Axis-aligned square centered on `center`, wound counter-clockwise.
    pub fn square(center: Vec2, half_size: f32) -> Self {
        Self::rect(center - Vec2::splat(half_size), center + Vec2::splat(half_size))
    }

    /// Axis-aligned rectangle between two corners, wound counter-clockwise.
    pub fn rect(min: Vec2, max: Vec2) -> Self {
        Self::new(vec![
            min,
            Vec2::new(max.x, min.y),
            max,
            Vec2::new(min.x, max.y),
        ])
    }

    pub fn with_contour(mut self, contour: Vec<usize>) -> Self {
        self.contour = Some(contour);
        self
    }

    pub fn with_hole(mut self, hole: Vec<Vec2>) -> Self {
        self.holes.push(hole);
        self
    }

    /// Outer loop in traversal order. Contour indices outside `nodes` are skipped.
    pub fn outline(&self) -> Vec<Vec2> {
        match &self.contour {
            Some(contour) => contour
                .iter()
                .filter_map(|&index| self.nodes.get(index).copied())
                .collect(),
            None => self.nodes.clone(),
        }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(self.nodes.iter().copied())
    }

    /// Signed area of the outer loop (positive when counter-clockwise).
    pub fn signed_area(&self) -> f32 {
        signed_area(&self.outline())
    }

    /// Outer loop made counter-clockwise, holes clockwise, duplicate
    /// consecutive points and degenerate loops removed.
    ///
    /// Returns `None` when the outer loop itself is degenerate.
    pub fn normalized(&self) -> Option<Shape> {
        let mut outline = dedup_loop(self.outline());
        if outline.len() < 3 || signed_area(&outline).abs() <= DISTANCE_TOLERANCE * DISTANCE_TOLERANCE {
            return None;
        }
        if signed_area(&outline) < 0.0 {
            outline.reverse();
        }

        let holes = self
            .holes
            .iter()
            .filter_map(|hole| {
                let mut hole = dedup_loop(hole.clone());
                let area = signed_area(&hole);
                if hole.len() < 3 || area.abs() <= DISTANCE_TOLERANCE * DISTANCE_TOLERANCE {
                    return None;
                }
                if area > 0.0 {
                    hole.reverse();
                }
                Some(hole)
            })
            .collect();

        Some(Shape {
            nodes: outline,
            contour: None,
            holes,
        })
    }
}

/// Shoelace area of a closed loop.
pub fn signed_area(points: &[Vec2]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        sum += p.perp_dot(q);
    }
    sum * 0.5
}

/// Drop points coinciding with their predecessor, including the wrap-around.
fn dedup_loop(mut points: Vec<Vec2>) -> Vec<Vec2> {
    points.dedup_by(|b, a| a.distance(*b) <= DISTANCE_TOLERANCE);
    while points.len() > 1 {
        let (first, last) = (points[0], points[points.len() - 1]);
        if first.distance(last) > DISTANCE_TOLERANCE {
            break;
        }
        points.pop();
    }
    points
}

/// Normalize every shape of a geometry, dropping degenerate ones.
pub fn normalize_geometry(geometry: &[Shape]) -> Geometry {
    geometry.iter().filter_map(Shape::normalized).collect()
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl Bounds {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn from_points<I: IntoIterator<Item = Vec2>>(points: I) -> Option<Self> {
        points.into_iter().fold(None, |bounds, p| {
            Some(match bounds {
                None => Bounds::new(p, p),
                Some(b) => Bounds::new(b.min.min(p), b.max.max(p)),
            })
        })
    }

    pub fn of_geometry(geometry: &[Shape]) -> Option<Self> {
        geometry
            .iter()
            .filter_map(Shape::bounds)
            .reduce(|a, b| a.union(&b))
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Union of two optional bounds; an absent side contributes nothing.
    pub fn merge(a: Option<Bounds>, b: Option<Bounds>) -> Option<Bounds> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, None) => a,
            (None, b) => b,
        }
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_square_is_counter_clockwise() {
        let square = Shape::square(Vec2::ZERO, 1.0);
        assert_relative_eq!(square.signed_area(), 4.0);
    }

    #[test]
    fn test_outline_follows_contour() {
        let shape = Shape::new(vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y]).with_contour(vec![3, 2, 1, 0, 9]);
        assert_eq!(shape.outline(), vec![Vec2::Y, Vec2::ONE, Vec2::X, Vec2::ZERO]);
    }

    #[test]
    fn test_normalized_fixes_orientation() {
        let clockwise = Shape::new(vec![Vec2::ZERO, Vec2::Y, Vec2::ONE, Vec2::X])
            .with_hole(vec![
                Vec2::new(0.25, 0.25),
                Vec2::new(0.75, 0.25),
                Vec2::new(0.75, 0.75),
                Vec2::new(0.25, 0.75),
            ]);
        let normalized = clockwise.normalized().unwrap();
        assert!(normalized.signed_area() > 0.0);
        assert!(signed_area(&normalized.holes[0]) < 0.0);
    }

    #[test]
    fn test_normalized_drops_duplicates_and_degenerates() {
        let shape = Shape::new(vec![Vec2::ZERO, Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::ZERO]);
        assert_eq!(shape.normalized().unwrap().nodes.len(), 3);

        let line = Shape::new(vec![Vec2::ZERO, Vec2::X, Vec2::new(2.0, 0.0)]);
        assert!(line.normalized().is_none());
    }

    #[test]
    fn test_bounds_merge() {
        let a = Bounds::from_points([Vec2::ZERO, Vec2::ONE]);
        let b = Bounds::from_points([Vec2::new(-1.0, 2.0)]);
        let merged = Bounds::merge(a, b).unwrap();
        assert_eq!(merged.min, Vec2::new(-1.0, 0.0));
        assert_eq!(merged.max, Vec2::new(1.0, 2.0));
        assert_eq!(Bounds::merge(None, None), None);
        assert!(merged.contains(Vec2::new(0.0, 1.5)));
    }
}
