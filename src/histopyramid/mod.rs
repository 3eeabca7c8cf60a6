// src/histopyramid/mod.rs
// HistoPyramid boolean engine: batching controller over segment, pyramid, filter and build passes.
// This file exists to orchestrate one union/split/intersection invocation against any PyramidDevice.
// RELEVANT FILES:src/histopyramid/device.rs,src/histopyramid/host.rs,src/histopyramid/gpu/mod.rs,src/histopyramid/reconstruct.rs

pub mod device;
pub mod holes;
pub mod host;
pub mod kernels;
pub mod plan;
pub mod pyramid;
pub mod reconstruct;
pub mod settings;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use device::PyramidDevice;
pub use host::HostDevice;
pub use plan::BatchPlan;
pub use pyramid::{HostPyramid, PyramidLayout};
pub use reconstruct::{EdgeLink, ExtractedShapes};
pub use settings::{BatchInfo, KernelSettings};

use std::time::Instant;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{PolyError, PolyResult};
use crate::geometry::{normalize_geometry, Geometry, Points, Shape, ShapePack};
use settings::{MODE_INTERSECTION, MODE_SPLIT, MODE_UNION};

/// Which pipeline an invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PassMode {
    Union,
    Split,
    Intersection,
}

impl PassMode {
    pub fn write_self(self) -> i32 {
        match self {
            PassMode::Union => MODE_UNION,
            PassMode::Split => MODE_SPLIT,
            PassMode::Intersection => MODE_INTERSECTION,
        }
    }
}

/// Statistics of the last engine invocation.
#[derive(Debug, Clone, Serialize)]
pub struct UnionStats {
    pub mode: PassMode,
    pub device: &'static str,
    pub line_count: u32,
    pub layers: u32,
    pub plan: BatchPlan,
    pub survivors_per_batch: Vec<u32>,
    pub loops: usize,
    pub holes: usize,
    pub holes_assigned: usize,
    pub exhausted_walks: usize,
    pub elapsed_ms: f32,
}

/// Boolean engine bound to one compute device.
///
/// Invocations are serialized by an in-progress guard; buffers live for one
/// invocation and are reused across its batches.
pub struct HistoPyramidEngine<D> {
    device: D,
    config: EngineConfig,
    in_progress: tokio::sync::Mutex<()>,
    last_stats: std::sync::Mutex<Option<UnionStats>>,
}

impl HistoPyramidEngine<HostDevice> {
    /// Engine on the data-parallel host device.
    pub fn host(config: EngineConfig) -> Self {
        let config = config.sanitized();
        Self::new(HostDevice::new(&config), config)
    }
}

impl<D: PyramidDevice> HistoPyramidEngine<D> {
    pub fn new(device: D, config: EngineConfig) -> Self {
        Self {
            device,
            config: config.sanitized(),
            in_progress: tokio::sync::Mutex::new(()),
            last_stats: std::sync::Mutex::new(None),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn last_stats(&self) -> Option<UnionStats> {
        self.last_stats.lock().ok().and_then(|stats| stats.clone())
    }

    pub async fn union(&self, geometry: &[Shape]) -> PolyResult<Geometry> {
        let _guard = self.in_progress.lock().await;
        self.run_boolean(geometry, PassMode::Union).await
    }

    /// Union each geometry independently under a single guard acquisition.
    pub async fn union_many(&self, geometries: &[Geometry]) -> PolyResult<Vec<Geometry>> {
        let _guard = self.in_progress.lock().await;
        let mut results = Vec::with_capacity(geometries.len());
        for geometry in geometries {
            results.push(self.run_boolean(geometry, PassMode::Union).await?);
        }
        Ok(results)
    }

    /// Cut every shape at its crossings without removing covered parts.
    pub async fn split(&self, geometry: &[Shape]) -> PolyResult<Geometry> {
        let _guard = self.in_progress.lock().await;
        self.run_boolean(geometry, PassMode::Split).await
    }

    /// Points where segments of the geometry properly cross.
    pub async fn intersection(&self, geometry: &[Shape]) -> PolyResult<Points> {
        let _guard = self.in_progress.lock().await;
        let start = Instant::now();
        let prepared = normalize_geometry(geometry);
        if prepared.is_empty() {
            return Ok(Vec::new());
        }

        let pack = ShapePack::pack(&prepared);
        let (layout, plan, settings) = self.plan(&pack, PassMode::Intersection)?;
        let mut session = self.device.begin(&pack, layout, settings).await?;
        let mut points = Vec::new();
        let mut survivors_per_batch = Vec::with_capacity(plan.batch_count as usize);

        for index in 0..plan.batch_count {
            log::debug!("Starting intersection batch {}/{}", index + 1, plan.batch_count);
            let batch = BatchInfo::new(index, &plan);
            self.device.segment_lines(&mut session, &batch).await?;
            let survivors = self.device.build_pyramid(&mut session).await?;
            let found = self.device.filter_intersections(&mut session, &batch, survivors).await?;
            check_count("intersection points", found.len(), survivors)?;
            survivors_per_batch.push(survivors);
            points.extend(found);
        }

        self.record(UnionStats {
            mode: PassMode::Intersection,
            device: self.device.label(),
            line_count: settings.line_count,
            layers: layout.layers,
            plan,
            survivors_per_batch,
            loops: 0,
            holes: 0,
            holes_assigned: 0,
            exhausted_walks: 0,
            elapsed_ms: start.elapsed().as_secs_f32() * 1000.0,
        });
        Ok(points)
    }

    fn plan(&self, pack: &ShapePack, mode: PassMode) -> PolyResult<(PyramidLayout, BatchPlan, KernelSettings)> {
        let line_count = u32::try_from(pack.line_count())
            .map_err(|_| PolyError::buffer(format!("{} lines exceed the u32 range", pack.line_count())))?;
        let max_layers = self.config.max_layers.min(self.device.max_layers());
        let layout = PyramidLayout::for_line_count(line_count, max_layers);
        let plan = BatchPlan::new(line_count, &layout, self.config.min_batch_width)?;
        let settings = KernelSettings {
            width: plan.width,
            thread_count: 0,
            line_count,
            write_self: mode.write_self(),
            max_x: pack.max_x(),
            layers: layout.layers,
        };
        log::debug!(
            "{:?} of {} lines: {} layers, {} batches of {}x{}",
            mode,
            line_count,
            layout.layers,
            plan.batch_count,
            plan.width,
            plan.height
        );
        Ok((layout, plan, settings))
    }

    async fn run_boolean(&self, geometry: &[Shape], mode: PassMode) -> PolyResult<Geometry> {
        let start = Instant::now();
        let prepared = normalize_geometry(geometry);
        if prepared.len() <= 1 {
            return Ok(prepared);
        }

        let pack = ShapePack::pack(&prepared);
        let (layout, plan, settings) = self.plan(&pack, mode)?;
        let mut session = self.device.begin(&pack, layout, settings).await?;
        let mut extracted = ExtractedShapes::default();
        let mut survivors_per_batch = Vec::with_capacity(plan.batch_count as usize);

        for index in 0..plan.batch_count {
            log::debug!("Starting batch {}/{}", index + 1, plan.batch_count);
            let batch = BatchInfo::new(index, &plan);
            self.device.segment_lines(&mut session, &batch).await?;
            let mut survivors = self.device.build_pyramid(&mut session).await?;
            if mode == PassMode::Union {
                self.device.filter_segments(&mut session, &batch, survivors).await?;
                survivors = self.device.build_pyramid(&mut session).await?;
            }
            let chunk = self.device.build_new_shapes(&mut session, &batch, survivors).await?;
            check_count("extracted edges", chunk.len(), survivors)?;
            log::debug!("batch {} kept {} sub-segments", index + 1, survivors);
            survivors_per_batch.push(survivors);
            extracted.append(chunk);
        }

        let formatted = reconstruct::format_new_shapes(&extracted, self.config.loop_max);
        let loops = formatted.shapes.len() + formatted.holes.len();
        let hole_count = formatted.holes.len();
        let exhausted_walks = formatted.exhausted_walks;
        let (shapes, holes_assigned) = holes::assign_holes(&self.device, formatted).await?;

        self.record(UnionStats {
            mode,
            device: self.device.label(),
            line_count: settings.line_count,
            layers: layout.layers,
            plan,
            survivors_per_batch,
            loops,
            holes: hole_count,
            holes_assigned,
            exhausted_walks,
            elapsed_ms: start.elapsed().as_secs_f32() * 1000.0,
        });
        Ok(shapes)
    }

    fn record(&self, stats: UnionStats) {
        if let Ok(mut slot) = self.last_stats.lock() {
            *slot = Some(stats);
        }
    }
}

fn check_count(what: &str, actual: usize, survivors: u32) -> PolyResult<()> {
    if actual != survivors as usize {
        return Err(PolyError::buffer(format!(
            "{} holds {} entries, survivor count is {}",
            what, actual, survivors
        )));
    }
    Ok(())
}
