// src/histopyramid/settings.rs
// Uniform structs shared byte-for-byte between the host and the WGSL kernels.
// This file exists to pin the field order and padding of every kernel parameter block.
// RELEVANT FILES:src/shaders/common.wgsl,src/histopyramid/gpu/mod.rs,src/histopyramid/kernels.rs

use bytemuck::{Pod, Zeroable};

use super::plan::BatchPlan;

/// Segment pass that records crossings only, once per unordered pair.
pub const MODE_INTERSECTION: i32 = 0;
/// Union pass: self cells written, inside sub-segments filtered out.
pub const MODE_UNION: i32 = 1;
/// Split pass: self cells written, every sub-segment kept.
pub const MODE_SPLIT: i32 = -1;

/// Settings shared by every kernel. Field order is a fixed contract.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct KernelSettings {
    /// Row width of the relation matrix.
    pub width: u32,
    /// Invocations of the current pass (survivor count for compaction passes).
    pub thread_count: u32,
    pub line_count: u32,
    /// Non-zero when self cells are written; see the `MODE_*` constants.
    pub write_self: i32,
    pub max_x: f32,
    pub layers: u32,
}

impl KernelSettings {
    pub fn writes_self(&self) -> bool {
        self.write_self != MODE_INTERSECTION
    }

    pub fn filters_inside(&self) -> bool {
        self.write_self == MODE_UNION
    }

    pub fn with_thread_count(mut self, thread_count: u32) -> Self {
        self.thread_count = thread_count;
        self
    }
}

/// Position of the current outer batch in the relation matrix.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct BatchInfo {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub _pad0: u32,
}

impl BatchInfo {
    pub fn new(index: u32, plan: &BatchPlan) -> Self {
        Self {
            index,
            width: plan.width,
            height: plan.height,
            _pad0: 0,
        }
    }

    /// First matrix row covered by this batch.
    pub fn first_row(&self) -> u32 {
        self.index * self.height
    }
}

/// One reduction step of the pyramid build.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct LayerSettings {
    /// Offset of the level being read inside the middle buffer.
    pub lower_start: u32,
    /// Width of the level being written.
    pub upper_dim: u32,
    pub layers: u32,
    /// Level being written (1 is the top).
    pub layer: u32,
}

/// Work-item window of one chunked dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchChunk {
    pub offset: u32,
    pub count: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

/// Split `total` work items into windows of at most `max_workers`.
pub fn dispatch_chunks(total: u32, max_workers: u32) -> impl Iterator<Item = DispatchChunk> {
    let step = max_workers.max(1);
    (0..total).step_by(step as usize).map(move |offset| DispatchChunk {
        offset,
        count: step.min(total - offset),
        _pad0: 0,
        _pad1: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts_are_tightly_packed() {
        assert_eq!(std::mem::size_of::<KernelSettings>(), 24);
        assert_eq!(std::mem::size_of::<BatchInfo>(), 16);
        assert_eq!(std::mem::size_of::<LayerSettings>(), 16);
        assert_eq!(std::mem::size_of::<DispatchChunk>(), 16);
    }

    #[test]
    fn test_settings_field_order() {
        let settings = KernelSettings {
            width: 1,
            thread_count: 2,
            line_count: 3,
            write_self: -1,
            max_x: 5.0,
            layers: 6,
        };
        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&settings));
        assert_eq!(words[0], 1);
        assert_eq!(words[2], 3);
        assert_eq!(words[3] as i32, -1);
        assert_eq!(f32::from_bits(words[4]), 5.0);
        assert_eq!(words[5], 6);
    }

    #[test]
    fn test_dispatch_chunks_cover_total() {
        let chunks: Vec<_> = dispatch_chunks(10, 4).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[2].offset, chunks[2].count), (8, 2));
        assert_eq!(dispatch_chunks(0, 4).count(), 0);
    }
}
