//! Pairwise line-segment classification.
//!
//! Every ordered pair of packed segments is related by one of seventeen fixed
//! relation codes plus a split parameter locating where the second segment
//! cuts the first. The numeric codes are shared with the WGSL kernels in
//! `src/shaders/common.wgsl` and must not be renumbered.

use glam::Vec2;
use std::f32::consts::{PI, TAU};

use crate::config::{DISTANCE_TOLERANCE, TOLERANCE};

/// Sentinel written to a base cell whose pair does not split the subject line.
pub const NO_VALUE: f32 = -10.0;

/// Sine of the smallest angle treated as non-parallel.
pub const PARALLEL_EPSILON: f32 = 1e-6;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    None = 0,
    /// Transversal crossing or touch.
    Intersection = 1,
    /// Fully inside the other line, same direction.
    Covered = 2,
    /// Fully covering the other line, same direction.
    Cover = 3,
    CoverStart = 4,
    CoveredStart = 5,
    CoverEnd = 6,
    CoveredEnd = 7,
    /// Sharing an interval, moving into the other line.
    Pre = 8,
    /// Sharing an interval, moving out of the other line.
    Pro = 9,
    /// Fully inside the other line, opposite direction.
    Rip = 10,
    /// Fully covering the other line, opposite direction.
    Ripped = 11,
    /// Opposite directions, moving into each other.
    Implode = 12,
    /// Opposite directions, moving out of each other.
    Explode = 13,
    /// Lines meet at an end point of each.
    Corner = 14,
    /// Same start and end points.
    Cancel = 15,
    SelfLine = 16,
}

impl Relation {
    pub const COUNT: usize = 17;

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        use Relation::*;
        const ALL: [Relation; Relation::COUNT] = [
            None, Intersection, Covered, Cover, CoverStart, CoveredStart, CoverEnd, CoveredEnd,
            Pre, Pro, Rip, Ripped, Implode, Explode, Corner, Cancel, SelfLine,
        ];
        ALL.get(code as usize).copied()
    }

    /// Whether the two lines share a stretch of the same supporting line.
    pub fn is_collinear_overlap(self) -> bool {
        (2..=13).contains(&self.code()) || self == Relation::Cancel
    }
}

/// Classification of segment `b` against subject segment `a`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineRelation {
    pub relation: Relation,
    /// Parameter along `a` where it must be split, or [`NO_VALUE`].
    pub split: f32,
    /// Turn from the direction of `a` to the direction of `b`, in `[0, 2π)`.
    pub angle: f32,
    /// Both lines cross strictly inside their interiors.
    pub proper: bool,
}

impl LineRelation {
    fn none(angle: f32) -> Self {
        Self {
            relation: Relation::None,
            split: NO_VALUE,
            angle,
            proper: false,
        }
    }

    pub fn has_split(&self) -> bool {
        self.split != NO_VALUE
    }
}

/// Parametric tolerance along a line of the given length.
#[inline]
pub fn param_tolerance(length: f32) -> f32 {
    (DISTANCE_TOLERANCE / length.max(f32::MIN_POSITIVE)).max(TOLERANCE)
}

/// Signed turn from `from` to `to` in `(-π, π]`.
#[inline]
pub fn signed_turn(from: Vec2, to: Vec2) -> f32 {
    let turn = from.perp_dot(to).atan2(from.dot(to));
    if turn <= -PI {
        PI
    } else {
        turn
    }
}

/// Turn from `from` to `to` mapped into `[0, 2π)`.
#[inline]
pub fn turn_angle(from: Vec2, to: Vec2) -> f32 {
    let turn = from.perp_dot(to).atan2(from.dot(to));
    if turn < 0.0 {
        (turn + TAU) % TAU
    } else {
        turn
    }
}

/// Relate segment `b0→b1` to subject segment `a0→a1`.
///
/// A split is reported where `b` crosses the interior of `a` away from the end
/// of `b`, or where the start of `b` lies on the interior of `a`. The end of `b`
/// is reported by the pair with the following segment, whose start it is.
pub fn relate(a0: Vec2, a1: Vec2, b0: Vec2, b1: Vec2) -> LineRelation {
    let r = a1 - a0;
    let w = b1 - b0;
    let len_a = r.length();
    let len_b = w.length();
    if len_a <= DISTANCE_TOLERANCE || len_b <= DISTANCE_TOLERANCE {
        return LineRelation::none(0.0);
    }

    let angle = turn_angle(r, w);
    let eps_a = param_tolerance(len_a);
    let eps_b = param_tolerance(len_b);
    let qp = b0 - a0;
    let denom = r.perp_dot(w);

    if denom.abs() > PARALLEL_EPSILON * len_a * len_b {
        let t = qp.perp_dot(w) / denom;
        let u = qp.perp_dot(r) / denom;
        if t < -eps_a || t > 1.0 + eps_a || u < -eps_b || u > 1.0 + eps_b {
            return LineRelation::none(angle);
        }

        let a_interior = t > eps_a && t < 1.0 - eps_a;
        let b_interior = u > eps_b && u < 1.0 - eps_b;
        let relation = if !a_interior && !b_interior {
            Relation::Corner
        } else {
            Relation::Intersection
        };
        let split = if a_interior && u < 1.0 - eps_b { t } else { NO_VALUE };

        return LineRelation {
            relation,
            split,
            angle,
            proper: a_interior && b_interior,
        };
    }

    // Parallel: only collinear lines interact.
    if qp.perp_dot(r).abs() / len_a > DISTANCE_TOLERANCE {
        return LineRelation::none(angle);
    }

    let len_a2 = len_a * len_a;
    let t0 = qp.dot(r) / len_a2;
    let t1 = (b1 - a0).dot(r) / len_a2;
    let same_direction = r.dot(w) > 0.0;
    let relation = collinear_relation(t0, t1, eps_a, same_direction);
    let split = if relation != Relation::None && t0 > eps_a && t0 < 1.0 - eps_a {
        t0
    } else {
        NO_VALUE
    };

    LineRelation {
        relation,
        split,
        angle,
        proper: false,
    }
}

/// Classify the overlap of `b`, projected onto `a` as `[t0, t1]`.
fn collinear_relation(t0: f32, t1: f32, eps: f32, same_direction: bool) -> Relation {
    let (lo, hi) = if same_direction { (t0, t1) } else { (t1, t0) };
    if hi <= eps || lo >= 1.0 - eps {
        return Relation::None;
    }
    let start_shared = lo.abs() <= eps;
    let end_shared = (hi - 1.0).abs() <= eps;
    if start_shared && end_shared {
        return Relation::Cancel;
    }

    if same_direction {
        if start_shared {
            if hi < 1.0 {
                Relation::CoverStart
            } else {
                Relation::CoveredStart
            }
        } else if end_shared {
            if lo > 0.0 {
                Relation::CoverEnd
            } else {
                Relation::CoveredEnd
            }
        } else if lo > 0.0 && hi < 1.0 {
            Relation::Cover
        } else if lo < 0.0 && hi > 1.0 {
            Relation::Covered
        } else if lo > 0.0 {
            Relation::Pre
        } else {
            Relation::Pro
        }
    } else if lo >= -eps && hi <= 1.0 + eps {
        Relation::Ripped
    } else if lo <= eps && hi >= 1.0 - eps {
        Relation::Rip
    } else if lo < 0.0 {
        Relation::Explode
    } else {
        Relation::Implode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn v(x: f32, y: f32) -> Vec2 {
        Vec2::new(x, y)
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Relation::None.code(), 0);
        assert_eq!(Relation::Pre.code(), 8);
        assert_eq!(Relation::Cancel.code(), 15);
        assert_eq!(Relation::SelfLine.code(), 16);
        for code in 0..Relation::COUNT as u32 {
            assert_eq!(Relation::from_code(code).map(Relation::code), Some(code));
        }
        assert_eq!(Relation::from_code(17), None);
    }

    #[test]
    fn test_proper_crossing_splits_both() {
        let rel = relate(v(0.0, 0.0), v(2.0, 0.0), v(0.5, -1.0), v(0.5, 1.0));
        assert_eq!(rel.relation, Relation::Intersection);
        assert!(rel.proper);
        assert_relative_eq!(rel.split, 0.25);
        assert_relative_eq!(rel.angle, std::f32::consts::FRAC_PI_2, epsilon = 1e-6);

        let back = relate(v(0.5, -1.0), v(0.5, 1.0), v(0.0, 0.0), v(2.0, 0.0));
        assert_relative_eq!(back.split, 0.5);
    }

    #[test]
    fn test_end_touch_is_left_to_successor() {
        // b ends on a's interior: no split from this pair.
        let rel = relate(v(0.0, 0.0), v(2.0, 0.0), v(1.0, 1.0), v(1.0, 0.0));
        assert_eq!(rel.relation, Relation::Intersection);
        assert!(!rel.has_split());

        // b starts on a's interior: split.
        let rel = relate(v(0.0, 0.0), v(2.0, 0.0), v(1.0, 0.0), v(1.0, 1.0));
        assert_relative_eq!(rel.split, 0.5);
        assert!(!rel.proper);
    }

    #[test]
    fn test_shared_corner() {
        let rel = relate(v(0.0, 0.0), v(1.0, 0.0), v(1.0, 0.0), v(1.0, 1.0));
        assert_eq!(rel.relation, Relation::Corner);
        assert!(!rel.has_split());
    }

    #[test]
    fn test_collinear_same_direction() {
        let a = (v(0.0, 0.0), v(4.0, 0.0));
        let cases = [
            ((1.0, 3.0), Relation::Cover, Some(0.25)),
            ((-1.0, 5.0), Relation::Covered, None),
            ((0.0, 2.0), Relation::CoverStart, None),
            ((0.0, 6.0), Relation::CoveredStart, None),
            ((2.0, 4.0), Relation::CoverEnd, Some(0.5)),
            ((-2.0, 4.0), Relation::CoveredEnd, None),
            ((2.0, 6.0), Relation::Pre, Some(0.5)),
            ((-2.0, 2.0), Relation::Pro, None),
            ((0.0, 4.0), Relation::Cancel, None),
            ((4.0, 6.0), Relation::None, None),
        ];
        for ((s, e), relation, split) in cases {
            let rel = relate(a.0, a.1, v(s, 0.0), v(e, 0.0));
            assert_eq!(rel.relation, relation, "b = [{s}, {e}]");
            assert_eq!(rel.has_split(), split.is_some(), "b = [{s}, {e}]");
            if let Some(split) = split {
                assert_relative_eq!(rel.split, split);
            }
        }
    }

    #[test]
    fn test_collinear_opposite_direction() {
        let a = (v(0.0, 0.0), v(4.0, 0.0));
        let cases = [
            ((3.0, 1.0), Relation::Ripped),
            ((5.0, -1.0), Relation::Rip),
            ((2.0, -2.0), Relation::Explode),
            ((6.0, 2.0), Relation::Implode),
            ((4.0, 0.0), Relation::Cancel),
            ((0.0, -3.0), Relation::None),
        ];
        for ((s, e), relation) in cases {
            let rel = relate(a.0, a.1, v(s, 0.0), v(e, 0.0));
            assert_eq!(rel.relation, relation, "b = [{s}, {e}]");
            assert!(relation.is_collinear_overlap() || relation == Relation::None);
        }
    }

    #[test]
    fn test_parallel_offset_is_none() {
        let rel = relate(v(0.0, 0.0), v(4.0, 0.0), v(0.0, 1.0), v(4.0, 1.0));
        assert_eq!(rel.relation, Relation::None);
        assert!(!rel.has_split());
    }

    #[test]
    fn test_turn_angles() {
        assert_relative_eq!(signed_turn(Vec2::X, Vec2::Y), std::f32::consts::FRAC_PI_2);
        assert_relative_eq!(signed_turn(Vec2::X, -Vec2::Y), -std::f32::consts::FRAC_PI_2);
        assert_relative_eq!(signed_turn(Vec2::X, -Vec2::X), PI);
        assert_relative_eq!(turn_angle(Vec2::X, -Vec2::Y), 1.5 * PI);
    }
}
