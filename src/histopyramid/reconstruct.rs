// src/histopyramid/reconstruct.rs
// Host-side loop reconstruction from the (id, next) successor links emitted by the build kernel.
// This file exists to turn compacted successor edges into closed outer loops and holes.
// RELEVANT FILES:src/histopyramid/mod.rs,src/histopyramid/holes.rs,src/shaders/build_new_shapes.wgsl

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use crate::geometry::{Geometry, Shape};

/// One directed output edge: its own id and the id of the edge that follows it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct EdgeLink {
    pub id: u32,
    pub next: u32,
}

/// Accumulated build-kernel output across batches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedShapes {
    pub info: Vec<EdgeLink>,
    pub points: Vec<Vec2>,
}

impl ExtractedShapes {
    pub fn len(&self) -> usize {
        self.info.len()
    }

    pub fn is_empty(&self) -> bool {
        self.info.is_empty()
    }

    pub fn push(&mut self, link: EdgeLink, point: Vec2) {
        self.info.push(link);
        self.points.push(point);
    }

    pub fn append(&mut self, mut other: ExtractedShapes) {
        self.info.append(&mut other.info);
        self.points.append(&mut other.points);
    }
}

/// Closed loops sorted into outer boundaries and holes.
#[derive(Debug, Clone, Default)]
pub struct FormattedShapes {
    pub shapes: Geometry,
    pub holes: Vec<Vec<Vec2>>,
    /// Walks aborted at the iteration cap.
    pub exhausted_walks: usize,
    /// Walks that ran into a missing successor or an earlier loop.
    pub open_chains: usize,
}

/// Whether a loop winds clockwise, judged at its lexicographically minimal vertex.
pub fn is_hole(points: &[Vec2]) -> bool {
    if points.len() < 3 {
        return false;
    }
    let mut min = 0;
    for (i, p) in points.iter().enumerate() {
        let m = points[min];
        if p.x < m.x || (p.x == m.x && p.y < m.y) {
            min = i;
        }
    }
    let a = points[(min + points.len() - 1) % points.len()];
    let b = points[min];
    let c = points[(min + 1) % points.len()];
    (b - a).perp_dot(c - a) < 0.0
}

/// Walk the successor links into loops.
///
/// Each walk starts at the lowest unvisited index and stops when it revisits
/// an index. A walk longer than `loop_max` is abandoned with a warning.
pub fn format_new_shapes(extracted: &ExtractedShapes, loop_max: usize) -> FormattedShapes {
    let count = extracted.len();
    let index_of: HashMap<u32, usize> = extracted
        .info
        .iter()
        .enumerate()
        .map(|(index, link)| (link.id, index))
        .collect();
    let next: Vec<Option<usize>> = extracted
        .info
        .iter()
        .map(|link| index_of.get(&link.next).copied())
        .collect();

    let mut formatted = FormattedShapes::default();
    let mut visited = vec![false; count];
    let mut walk_position = vec![usize::MAX; count];

    for start in 0..count {
        if visited[start] {
            continue;
        }
        let mut walk: Vec<usize> = Vec::new();
        let mut current = Some(start);

        loop {
            let Some(index) = current else {
                log::debug!("open chain of {} edges dropped", walk.len());
                formatted.open_chains += 1;
                break;
            };
            if visited[index] {
                let position = walk_position[index];
                if position == usize::MAX || walk.get(position) != Some(&index) {
                    formatted.open_chains += 1;
                } else {
                    let ring: Vec<Vec2> = walk[position..].iter().map(|&i| extracted.points[i]).collect();
                    if ring.len() >= 3 {
                        if is_hole(&ring) {
                            formatted.holes.push(ring);
                        } else {
                            formatted.shapes.push(Shape::new(ring));
                        }
                    }
                }
                break;
            }
            if walk.len() >= loop_max {
                log::warn!(
                    "Reconstruction walk from edge {} exceeded {} iterations, aborting",
                    start,
                    loop_max
                );
                formatted.exhausted_walks += 1;
                break;
            }
            visited[index] = true;
            walk_position[index] = walk.len();
            walk.push(index);
            current = next[index];
        }
    }
    formatted
}
