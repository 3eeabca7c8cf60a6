// src/histopyramid/host.rs
// Host compute device running the pyramid kernels data-parallel with rayon.
// This file exists to provide a deterministic device when no GPU adapter is present, and as the reference for the WGSL passes.
// RELEVANT FILES:src/histopyramid/kernels.rs,src/histopyramid/device.rs,src/histopyramid/gpu/mod.rs

use glam::Vec2;
use rayon::prelude::*;

use super::device::PyramidDevice;
use super::kernels;
use super::pyramid::{HostPyramid, PyramidLayout};
use super::reconstruct::{EdgeLink, ExtractedShapes};
use super::settings::{dispatch_chunks, BatchInfo, KernelSettings};
use crate::config::{EngineConfig, MAX_LAYERS};
use crate::error::{PolyError, PolyResult};
use crate::geometry::ShapePack;

/// Data-parallel CPU device.
#[derive(Debug, Clone)]
pub struct HostDevice {
    max_workers: u32,
}

/// Buffers of one host union invocation.
#[derive(Debug)]
pub struct HostSession {
    pack: ShapePack,
    settings: KernelSettings,
    pyramid: HostPyramid,
}

impl HostDevice {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_workers: config.max_workers_per_pass(),
        }
    }

    /// Base cells of the survivors, in compacted order.
    fn compacted_cells(&self, pyramid: &HostPyramid, survivors: u32) -> PolyResult<Vec<u32>> {
        let mut cells = Vec::with_capacity(survivors as usize);
        for chunk in dispatch_chunks(survivors, self.max_workers) {
            let found: Option<Vec<u32>> = (chunk.offset..chunk.offset + chunk.count)
                .into_par_iter()
                .map(|k| pyramid.traverse(k))
                .collect();
            let found = found.ok_or_else(|| {
                PolyError::buffer(format!(
                    "survivor count {} exceeds pyramid contents {}",
                    survivors,
                    pyramid.survivor_count()
                ))
            })?;
            cells.extend(found);
        }
        Ok(cells)
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl PyramidDevice for HostDevice {
    type Session = HostSession;

    fn label(&self) -> &'static str {
        "host"
    }

    fn max_layers(&self) -> u32 {
        MAX_LAYERS
    }

    async fn begin(&self, pack: &ShapePack, layout: PyramidLayout, settings: KernelSettings) -> PolyResult<HostSession> {
        if pack.line_count() != settings.line_count as usize || pack.points.len() != pack.line_count() * 2 {
            return Err(PolyError::buffer(format!(
                "pack holds {} segments and {} coordinates, settings declare {} lines",
                pack.line_count(),
                pack.points.len(),
                settings.line_count
            )));
        }
        Ok(HostSession {
            pack: pack.clone(),
            settings,
            pyramid: HostPyramid::new(layout),
        })
    }

    async fn segment_lines(&self, session: &mut HostSession, batch: &BatchInfo) -> PolyResult<()> {
        let HostSession { pack, settings, pyramid } = session;
        let total = dispatch_total("base cells", pyramid.base.len() as u64)?;
        for chunk in dispatch_chunks(total, self.max_workers) {
            let range = chunk.offset as usize..(chunk.offset + chunk.count) as usize;
            pyramid.base[range]
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, cell)| {
                    *cell = kernels::segment_cell(pack, settings, batch, chunk.offset + i as u32);
                });
        }
        Ok(())
    }

    async fn build_pyramid(&self, session: &mut HostSession) -> PolyResult<u32> {
        Ok(session.pyramid.build())
    }

    async fn filter_segments(&self, session: &mut HostSession, batch: &BatchInfo, survivors: u32) -> PolyResult<()> {
        let cells = self.compacted_cells(&session.pyramid, survivors)?;
        let settings = session.settings.with_thread_count(survivors);
        let HostSession { pack, pyramid, .. } = session;
        let filtered: Vec<(u32, [f32; 2])> = cells
            .par_iter()
            .map(|&cell| {
                let value = pyramid.base[cell as usize];
                (cell, kernels::filter_cell(pack, &settings, batch, cell, value))
            })
            .collect();
        for (cell, value) in filtered {
            pyramid.base[cell as usize] = value;
        }
        Ok(())
    }

    async fn build_new_shapes(&self, session: &mut HostSession, batch: &BatchInfo, survivors: u32) -> PolyResult<ExtractedShapes> {
        let cells = self.compacted_cells(&session.pyramid, survivors)?;
        let settings = session.settings.with_thread_count(survivors);
        let HostSession { pack, pyramid, .. } = session;
        let built: Vec<([u32; 2], [f32; 2])> = cells
            .par_iter()
            .map(|&cell| kernels::build_cell(pack, &settings, batch, cell, pyramid.base[cell as usize]))
            .collect();

        let mut extracted = ExtractedShapes::default();
        for ([id, next], point) in built {
            extracted.push(EdgeLink { id, next }, Vec2::from_array(point));
        }
        Ok(extracted)
    }

    async fn filter_intersections(&self, session: &mut HostSession, batch: &BatchInfo, survivors: u32) -> PolyResult<Vec<Vec2>> {
        let cells = self.compacted_cells(&session.pyramid, survivors)?;
        let HostSession { pack, settings, pyramid } = session;
        Ok(cells
            .par_iter()
            .map(|&cell| {
                let point = kernels::intersection_point(pack, settings, batch, cell, pyramid.base[cell as usize]);
                Vec2::from_array(point)
            })
            .collect())
    }

    async fn hole_owners(&self, shapes: &ShapePack, hole_points: &[Vec2]) -> PolyResult<Vec<i32>> {
        let settings = KernelSettings {
            width: 0,
            thread_count: dispatch_total("hole points", hole_points.len() as u64)?,
            line_count: dispatch_total("hole lines", shapes.line_count() as u64)?,
            write_self: 0,
            max_x: shapes.max_x(),
            layers: 0,
        };
        let total = dispatch_total(
            "hole/line pairs",
            u64::from(settings.thread_count) * u64::from(settings.line_count),
        )?;
        let mut crossings = Vec::with_capacity(total as usize);
        for chunk in dispatch_chunks(total, self.max_workers) {
            let part: Vec<f32> = (chunk.offset..chunk.offset + chunk.count)
                .into_par_iter()
                .map(|index| kernels::hole_crossing(shapes, &settings, hole_points, index))
                .collect();
            crossings.extend(part);
        }
        Ok((0..settings.thread_count)
            .into_par_iter()
            .map(|hole| kernels::hole_owner(shapes, &settings, &crossings, hole))
            .collect())
    }
}

/// Work-item count of one pass, rejected when it leaves the u32 dispatch range.
fn dispatch_total(what: &str, count: u64) -> PolyResult<u32> {
    u32::try_from(count).map_err(|_| PolyError::buffer(format!("{} {} exceed the dispatch range", count, what)))
}
