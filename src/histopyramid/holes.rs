// src/histopyramid/holes.rs
// Assignment of reconstructed hole loops to their enclosing output shapes.
// This file exists to pack the outer loops, run the winding/reduce kernels and attach every hole to its owner.
// RELEVANT FILES:src/histopyramid/reconstruct.rs,src/shaders/hole_winding.wgsl,src/histopyramid/gpu/mod.rs

use glam::Vec2;

use super::device::PyramidDevice;
use super::reconstruct::FormattedShapes;
use crate::error::{PolyError, PolyResult};
use crate::geometry::{Geometry, ShapePack};

/// First point of every hole, the ray origin for winding tests.
pub fn hole_points(holes: &[Vec<Vec2>]) -> PolyResult<Vec<Vec2>> {
    let points: Vec<Vec2> = holes.iter().filter_map(|hole| hole.first().copied()).collect();
    if points.len() != holes.len() {
        return Err(PolyError::buffer(format!(
            "hole point buffer holds {} points for {} holes",
            points.len(),
            holes.len()
        )));
    }
    Ok(points)
}

/// Attach holes to the shapes that enclose them.
///
/// Holes without an owner are dropped, as are holes whose owner index falls
/// outside the shape list.
pub async fn assign_holes<D: PyramidDevice>(device: &D, formatted: FormattedShapes) -> PolyResult<(Geometry, usize)> {
    let FormattedShapes { mut shapes, holes, .. } = formatted;
    if holes.is_empty() || shapes.is_empty() {
        if !holes.is_empty() {
            log::warn!("{} holes without any enclosing shape dropped", holes.len());
        }
        return Ok((shapes, 0));
    }

    let pack = ShapePack::pack(&shapes);
    let points = hole_points(&holes)?;
    let owners = device.hole_owners(&pack, &points).await?;
    if owners.len() != holes.len() {
        return Err(PolyError::buffer(format!(
            "hole reduce returned {} owners for {} holes",
            owners.len(),
            holes.len()
        )));
    }

    let mut assigned = 0;
    for (hole, owner) in holes.into_iter().zip(owners) {
        match usize::try_from(owner).ok().and_then(|index| shapes.get_mut(index)) {
            Some(shape) => {
                shape.holes.push(hole);
                assigned += 1;
            }
            None => log::warn!("hole at {:?} has no owner (index {}), dropped", hole[0], owner),
        }
    }
    Ok((shapes, assigned))
}
