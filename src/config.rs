// src/config.rs
// Engine configuration and graph evaluation flags.
// This file exists to keep every tunable limit of the HistoPyramid engine in one serde-loadable struct.
// RELEVANT FILES:src/histopyramid/plan.rs,src/histopyramid/mod.rs,src/graph/builder.rs

use serde::{Deserialize, Serialize};

use crate::error::PolyResult;

/// Parametric tolerance used for split comparisons along a line.
pub const TOLERANCE: f32 = 5e-6;

/// Distance below which two points or a point and a line are considered coincident.
pub const DISTANCE_TOLERANCE: f32 = 1e-4;

/// Smallest number of pyramid layers ever allocated.
pub const MIN_LAYERS: u32 = 4;

/// Largest number of pyramid layers the layout supports.
pub const MAX_LAYERS: u32 = 40;

/// Tunable limits of the HistoPyramid engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on pyramid layers; the base grid holds 4^max_layers cells.
    pub max_layers: u32,
    /// Minimum row width of the relation matrix.
    pub min_batch_width: u32,
    /// Invocations per workgroup.
    pub workgroup_size: u32,
    /// Workgroups per dispatch dimension.
    pub max_workgroups: u32,
    /// Iteration cap of a single reconstruction walk.
    pub loop_max: usize,
    /// Half size of the square `create` builds around each position.
    pub create_radius: f32,
    /// Try a wgpu adapter before falling back to the host device.
    pub prefer_gpu: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_layers: 11,
            min_batch_width: 16,
            workgroup_size: 256,
            max_workgroups: 65535,
            loop_max: 10_000,
            create_radius: 1.0,
            prefer_gpu: true,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from JSON; missing fields keep their defaults.
    pub fn from_json(text: &str) -> PolyResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        Ok(config.sanitized())
    }

    /// Work items a single dispatch may cover before it is chunked.
    pub fn max_workers_per_pass(&self) -> u32 {
        self.workgroup_size.saturating_mul(self.max_workgroups)
    }

    /// Clamp fields into the ranges the engine can honour.
    pub fn sanitized(mut self) -> Self {
        self.max_layers = self.max_layers.clamp(MIN_LAYERS, MAX_LAYERS);
        self.min_batch_width = self.min_batch_width.max(1).next_power_of_two();
        self.workgroup_size = self.workgroup_size.max(1);
        self.max_workgroups = self.max_workgroups.max(1);
        self.loop_max = self.loop_max.max(1);
        self
    }

    pub fn with_max_layers(mut self, max_layers: u32) -> Self {
        self.max_layers = max_layers.clamp(MIN_LAYERS, MAX_LAYERS);
        self
    }

    pub fn with_loop_max(mut self, loop_max: usize) -> Self {
        self.loop_max = loop_max.max(1);
        self
    }

    pub fn with_max_workgroups(mut self, max_workgroups: u32) -> Self {
        self.max_workgroups = max_workgroups.max(1);
        self
    }

    pub fn with_prefer_gpu(mut self, prefer_gpu: bool) -> Self {
        self.prefer_gpu = prefer_gpu;
        self
    }
}

/// Flags and backend for a single graph evaluation.
#[derive(Debug, Clone)]
pub struct EvaluateOptions<B> {
    /// Fuse compatible single-dependent operations before staging.
    pub merge: bool,
    /// Drop every node that does not contribute to the returned reference.
    pub remove_unused: bool,
    pub backend: B,
}

impl<B> EvaluateOptions<B> {
    pub fn new(backend: B) -> Self {
        Self {
            merge: true,
            remove_unused: true,
            backend,
        }
    }

    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_remove_unused(mut self, remove_unused: bool) -> Self {
        self.remove_unused = remove_unused;
        self
    }
}
