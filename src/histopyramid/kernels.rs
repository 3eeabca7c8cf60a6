// src/histopyramid/kernels.rs
// Per-invocation kernel bodies for segmenting, filtering, linking and hole ownership.
// This file exists so the host device runs exactly the arithmetic the WGSL kernels run, one work item at a time.
// RELEVANT FILES:src/shaders/common.wgsl,src/shaders/segment_lines.wgsl,src/shaders/build_new_shapes.wgsl,src/histopyramid/host.rs

use glam::Vec2;

use super::settings::{BatchInfo, KernelSettings};
use crate::config::DISTANCE_TOLERANCE;
use crate::geometry::relation::{param_tolerance, relate, signed_turn, turn_angle, NO_VALUE};
use crate::geometry::ShapePack;

/// Angle offset marking a survivor as discarded by the filter pass.
pub const DISCARD_ANGLE: f32 = 4.0 * std::f32::consts::PI;

/// Successor id written when no outgoing sub-segment exists.
pub const NO_SUCCESSOR: u32 = u32::MAX;

/// Turns closer than this are considered equal when choosing a successor.
const TURN_EPSILON: f32 = 1e-5;

/// Matrix coordinates `(row, column)` of local base cell `cell`, if it maps to a line pair.
#[inline]
pub fn cell_coord(settings: &KernelSettings, batch: &BatchInfo, cell: u32) -> Option<(u32, u32)> {
    let local_row = cell / batch.width;
    let col = cell % batch.width;
    let row = batch.first_row() + local_row;
    if local_row >= batch.height || row >= settings.line_count || col >= settings.line_count {
        return None;
    }
    Some((row, col))
}

/// Split value of column line `col` on row line `row`.
pub fn split_value(pack: &ShapePack, settings: &KernelSettings, row: u32, col: u32) -> f32 {
    if row == col {
        return if settings.writes_self() { 0.0 } else { NO_VALUE };
    }
    let (a0, a1) = pack.line(row as usize);
    let (b0, b1) = pack.line(col as usize);
    let relation = relate(a0, a1, b0, b1);
    if settings.writes_self() {
        relation.split
    } else if relation.proper && row < col {
        relation.split
    } else {
        NO_VALUE
    }
}

/// Segment kernel: `(angle, value)` for one base cell.
pub fn segment_cell(pack: &ShapePack, settings: &KernelSettings, batch: &BatchInfo, cell: u32) -> [f32; 2] {
    let Some((row, col)) = cell_coord(settings, batch, cell) else {
        return [0.0, NO_VALUE];
    };
    let value = split_value(pack, settings, row, col);
    if row == col || value == NO_VALUE {
        return [0.0, value];
    }
    let (a0, a1) = pack.line(row as usize);
    let (b0, b1) = pack.line(col as usize);
    [turn_angle(a1 - a0, b1 - b0), value]
}

/// Smallest split on `row` beyond `s`, or 1 at the end of the line.
pub fn next_split(pack: &ShapePack, settings: &KernelSettings, row: u32, s: f32) -> f32 {
    let (a0, a1) = pack.line(row as usize);
    let eps = param_tolerance(a0.distance(a1));
    let mut next = 1.0f32;
    for col in 0..settings.line_count {
        let value = split_value(pack, settings, row, col);
        if value != NO_VALUE && value > s + eps && value < next {
            next = value;
        }
    }
    next
}

#[inline]
fn point_on_segment(m: Vec2, p: Vec2, q: Vec2) -> bool {
    let d = q - p;
    let len2 = d.length_squared();
    if len2 <= f32::MIN_POSITIVE {
        return m.distance(p) <= DISTANCE_TOLERANCE;
    }
    let len = len2.sqrt();
    let eps = param_tolerance(len);
    let t = (m - p).dot(d) / len2;
    if t < -eps || t > 1.0 + eps {
        return false;
    }
    (m - p).perp_dot(d).abs() / len <= DISTANCE_TOLERANCE
}

#[inline]
fn ray_crosses(m: Vec2, p: Vec2, q: Vec2) -> Option<f32> {
    if (p.y > m.y) != (q.y > m.y) {
        let x = p.x + (m.y - p.y) * (q.x - p.x) / (q.y - p.y);
        if x > m.x {
            return Some(x - m.x);
        }
    }
    None
}

/// Whether the sub-segment of `row` starting at `s` lies outside every other shape.
///
/// Coincident edges of two shapes: opposite directions drop both, the same
/// direction keeps the one owned by the lower shape index.
fn outside_other_shapes(pack: &ShapePack, settings: &KernelSettings, row: u32, mid: Vec2, dir: Vec2) -> bool {
    let own = pack.shape_of(row as usize);
    let mut current = i32::MIN;
    let mut inside = false;
    let mut on_boundary = false;

    for line in 0..settings.line_count as usize {
        let shape = pack.shape_of(line);
        if shape != current {
            if inside && !on_boundary {
                return false;
            }
            current = shape;
            inside = false;
            on_boundary = false;
        }
        if shape == own {
            continue;
        }
        let (p, q) = pack.line(line);
        if point_on_segment(mid, p, q) {
            if dir.dot(q - p) <= 0.0 || own > shape {
                return false;
            }
            on_boundary = true;
            continue;
        }
        if ray_crosses(mid, p, q).is_some() {
            inside = !inside;
        }
    }
    !(inside && !on_boundary)
}

/// Whether the sub-segment `(row, col)` starting at split `s` survives filtering.
pub fn keeps_sub_segment(pack: &ShapePack, settings: &KernelSettings, row: u32, col: u32, s: f32) -> bool {
    let (a0, a1) = pack.line(row as usize);
    let eps = param_tolerance(a0.distance(a1));
    for earlier in 0..col {
        let value = split_value(pack, settings, row, earlier);
        if value != NO_VALUE && (value - s).abs() <= eps {
            return false;
        }
    }
    if !settings.filters_inside() {
        return true;
    }
    let s_next = next_split(pack, settings, row, s);
    let mid = a0.lerp(a1, 0.5 * (s + s_next));
    outside_other_shapes(pack, settings, row, mid, a1 - a0)
}

/// Filter kernel: the cell unchanged, or with its angle raised past 2π.
pub fn filter_cell(pack: &ShapePack, settings: &KernelSettings, batch: &BatchInfo, cell: u32, value: [f32; 2]) -> [f32; 2] {
    let Some((row, col)) = cell_coord(settings, batch, cell) else {
        return value;
    };
    if keeps_sub_segment(pack, settings, row, col, value[1]) {
        value
    } else {
        [value[0] + DISCARD_ANGLE, value[1]]
    }
}

/// First column whose split on `line` lands at parameter `t`.
fn canonical_column(pack: &ShapePack, settings: &KernelSettings, line: u32, t: f32, eps: f32) -> Option<u32> {
    (0..settings.line_count).find(|&col| {
        let value = split_value(pack, settings, line, col);
        value != NO_VALUE && (value - t).abs() <= eps
    })
}

/// Id of the kept sub-segment leaving `end` with the largest left turn from `dir_in`.
pub fn successor(pack: &ShapePack, settings: &KernelSettings, end: Vec2, dir_in: Vec2) -> u32 {
    let mut best = NO_SUCCESSOR;
    let mut best_turn = f32::NEG_INFINITY;

    for line in 0..settings.line_count {
        let (p, q) = pack.line(line as usize);
        if !point_on_segment(end, p, q) {
            continue;
        }
        let d = q - p;
        let eps = param_tolerance(d.length());
        let t = (end - p).dot(d) / d.length_squared();
        if t >= 1.0 - eps {
            continue;
        }
        let (col, s) = if t <= eps {
            (line, 0.0)
        } else {
            match canonical_column(pack, settings, line, t, eps) {
                Some(col) => (col, split_value(pack, settings, line, col)),
                None => continue,
            }
        };
        let turn = signed_turn(dir_in, d);
        if turn >= std::f32::consts::PI - TURN_EPSILON {
            continue;
        }
        if !keeps_sub_segment(pack, settings, line, col, s) {
            continue;
        }
        let id = line * settings.width + col;
        if turn > best_turn + TURN_EPSILON || ((turn - best_turn).abs() <= TURN_EPSILON && id < best) {
            best = id;
            best_turn = turn;
        }
    }
    best
}

/// Build kernel: `(id, next)` and the start point of one kept sub-segment.
pub fn build_cell(pack: &ShapePack, settings: &KernelSettings, batch: &BatchInfo, cell: u32, value: [f32; 2]) -> ([u32; 2], [f32; 2]) {
    let Some((row, col)) = cell_coord(settings, batch, cell) else {
        return ([NO_SUCCESSOR, NO_SUCCESSOR], [0.0, 0.0]);
    };
    let s = value[1];
    let (a0, a1) = pack.line(row as usize);
    let s_next = next_split(pack, settings, row, s);
    let start = a0.lerp(a1, s);
    let end = if s_next >= 1.0 { a1 } else { a0.lerp(a1, s_next) };
    let id = row * settings.width + col;
    let next = successor(pack, settings, end, a1 - a0);
    ([id, next], start.to_array())
}

/// Intersection kernel: the crossing point recorded in one surviving cell.
pub fn intersection_point(pack: &ShapePack, settings: &KernelSettings, batch: &BatchInfo, cell: u32, value: [f32; 2]) -> [f32; 2] {
    match cell_coord(settings, batch, cell) {
        Some((row, _)) => {
            let (a0, a1) = pack.line(row as usize);
            a0.lerp(a1, value[1]).to_array()
        }
        None => [0.0, 0.0],
    }
}

/// Hole winding kernel: ray distance from hole `index / line_count` to line `index % line_count`, or -1.
pub fn hole_crossing(pack: &ShapePack, settings: &KernelSettings, hole_points: &[Vec2], index: u32) -> f32 {
    let hole = (index / settings.line_count) as usize;
    let line = (index % settings.line_count) as usize;
    let (p, q) = pack.line(line);
    ray_crosses(hole_points[hole], p, q).unwrap_or(-1.0)
}

/// Hole reduce kernel: nearest enclosing shape of hole `hole`, or -1.
pub fn hole_owner(pack: &ShapePack, settings: &KernelSettings, crossings: &[f32], hole: u32) -> i32 {
    let row = &crossings[(hole * settings.line_count) as usize..((hole + 1) * settings.line_count) as usize];
    let mut owner = -1;
    let mut owner_distance = f32::INFINITY;
    let mut current = i32::MIN;
    let mut count = 0u32;
    let mut nearest = f32::INFINITY;

    for line in 0..=settings.line_count as usize {
        let shape = if line < row.len() { pack.shape_of(line) } else { i32::MIN };
        if shape != current {
            if count % 2 == 1 && nearest < owner_distance {
                owner = current;
                owner_distance = nearest;
            }
            current = shape;
            count = 0;
            nearest = f32::INFINITY;
        }
        if line < row.len() && row[line] >= 0.0 {
            count += 1;
            nearest = nearest.min(row[line]);
        }
    }
    owner
}
