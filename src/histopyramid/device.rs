// src/histopyramid/device.rs
// Compute-device seam of the HistoPyramid engine.
// This file exists so the batching controller drives host and wgpu kernels through one pass-level contract.
// RELEVANT FILES:src/histopyramid/host.rs,src/histopyramid/gpu/mod.rs,src/histopyramid/mod.rs

use glam::Vec2;

use super::pyramid::PyramidLayout;
use super::reconstruct::ExtractedShapes;
use super::settings::{BatchInfo, KernelSettings};
use crate::error::PolyResult;
use crate::geometry::ShapePack;

/// A data-parallel device able to run the pyramid passes.
///
/// Passes of one session run strictly in call order. `build_pyramid` is the
/// synchronous read-back point: its survivor count sizes the next dispatch.
#[allow(async_fn_in_trait)]
pub trait PyramidDevice {
    /// Per-invocation buffers, reused across the batches of one union.
    type Session;

    fn label(&self) -> &'static str;

    /// Largest pyramid the device can hold.
    fn max_layers(&self) -> u32;

    /// Upload the pack and allocate pyramid buffers.
    async fn begin(&self, pack: &ShapePack, layout: PyramidLayout, settings: KernelSettings) -> PolyResult<Self::Session>;

    /// Classify every line pair of `batch` into the pyramid base.
    async fn segment_lines(&self, session: &mut Self::Session, batch: &BatchInfo) -> PolyResult<()>;

    /// Reduce the base and read back the survivor count.
    async fn build_pyramid(&self, session: &mut Self::Session) -> PolyResult<u32>;

    /// Discard duplicate and inside sub-segments among `survivors` cells.
    async fn filter_segments(&self, session: &mut Self::Session, batch: &BatchInfo, survivors: u32) -> PolyResult<()>;

    /// Link every surviving sub-segment to its successor.
    async fn build_new_shapes(&self, session: &mut Self::Session, batch: &BatchInfo, survivors: u32) -> PolyResult<ExtractedShapes>;

    /// Compact the crossing points of `survivors` cells.
    async fn filter_intersections(&self, session: &mut Self::Session, batch: &BatchInfo, survivors: u32) -> PolyResult<Vec<Vec2>>;

    /// Owning shape index of each hole point in `shapes`, or -1.
    async fn hole_owners(&self, shapes: &ShapePack, hole_points: &[Vec2]) -> PolyResult<Vec<i32>>;
}
