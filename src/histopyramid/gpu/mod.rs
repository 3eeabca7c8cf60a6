// src/histopyramid/gpu/mod.rs
// wgpu compute device running the HistoPyramid passes on the GPU.
// This file exists to allocate per-invocation buffers, chunk dispatches under the workgroup limit and read results back.
// RELEVANT FILES:src/histopyramid/gpu/pipelines.rs,src/histopyramid/device.rs,src/shaders/pyramid.wgsl,src/gpu.rs

pub mod pipelines;

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use futures_intrusive::channel::shared::oneshot_channel;
use glam::Vec2;
use wgpu::util::DeviceExt;

use super::device::PyramidDevice;
use super::pyramid::PyramidLayout;
use super::reconstruct::{EdgeLink, ExtractedShapes};
use super::settings::{dispatch_chunks, BatchInfo, DispatchChunk, KernelSettings, LayerSettings};
use crate::config::{EngineConfig, MAX_LAYERS, MIN_LAYERS};
use crate::error::{PolyError, PolyResult};
use crate::geometry::ShapePack;
use crate::gpu::GpuContext;
use pipelines::{Pipelines, WORKGROUP_SIZE};

/// Smallest allocation for any storage or uniform buffer.
const MIN_BUFFER_SIZE: u64 = 32;

/// GPU device bound to the process-wide wgpu context.
pub struct GpuDevice {
    ctx: Arc<GpuContext>,
    pipelines: &'static Pipelines,
    max_workers: u32,
    max_layers: u32,
}

/// Buffers of one GPU union invocation.
pub struct GpuSession {
    layout: PyramidLayout,
    settings: KernelSettings,
    settings_buffer: wgpu::Buffer,
    top: wgpu::Buffer,
    pyramid_group: wgpu::BindGroup,
    shape_info: wgpu::Buffer,
    points: wgpu::Buffer,
    out_links: wgpu::Buffer,
    out_points: wgpu::Buffer,
    out_capacity: u32,
    shape_group: wgpu::BindGroup,
}

impl GpuDevice {
    pub fn new(ctx: Arc<GpuContext>, config: &EngineConfig) -> Self {
        let pipelines = Pipelines::get(&ctx.device);
        let workgroups = config
            .max_workgroups
            .min(ctx.limits.max_compute_workgroups_per_dimension)
            .max(1);
        let max_cells = u64::from(ctx.limits.max_storage_buffer_binding_size) / 8;
        let max_layers = ((63 - max_cells.max(1).leading_zeros()) / 2).clamp(MIN_LAYERS, MAX_LAYERS);
        log::debug!(
            "GPU device {}: {} workers per dispatch, up to {} layers",
            ctx.adapter_info.name,
            WORKGROUP_SIZE * workgroups,
            max_layers
        );
        Self {
            ctx,
            pipelines,
            max_workers: WORKGROUP_SIZE * workgroups,
            max_layers,
        }
    }

    fn device(&self) -> &wgpu::Device {
        &self.ctx.device
    }

    fn storage_init(&self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        let mut bytes = contents.to_vec();
        if (bytes.len() as u64) < MIN_BUFFER_SIZE {
            bytes.resize(MIN_BUFFER_SIZE as usize, 0);
        }
        self.device().create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: &bytes,
            usage: wgpu::BufferUsages::STORAGE | usage,
        })
    }

    fn storage_empty(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size.max(MIN_BUFFER_SIZE),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    fn uniform<T: Pod>(&self, label: &str, value: &T) -> wgpu::Buffer {
        let mut bytes = bytemuck::bytes_of(value).to_vec();
        if (bytes.len() as u64) < MIN_BUFFER_SIZE {
            bytes.resize(MIN_BUFFER_SIZE as usize, 0);
        }
        self.device().create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: &bytes,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    }

    fn check_binding(&self, what: &str, size: u64) -> PolyResult<()> {
        let limit = u64::from(self.ctx.limits.max_storage_buffer_binding_size);
        if size > limit {
            return Err(PolyError::buffer(format!(
                "{} needs {} bytes, device binding limit is {}",
                what, size, limit
            )));
        }
        Ok(())
    }

    fn shape_group(&self, session_buffers: [&wgpu::Buffer; 4]) -> wgpu::BindGroup {
        let [shape_info, points, out_links, out_points] = session_buffers;
        self.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("histopyramid-shape-group"),
            layout: &self.pipelines.shape_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: shape_info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: points.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: out_links.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: out_points.as_entire_binding(),
                },
            ],
        })
    }

    /// Grow the compaction outputs to hold `survivors` entries.
    fn reserve_outputs(&self, session: &mut GpuSession, survivors: u32) -> PolyResult<()> {
        if survivors <= session.out_capacity {
            return Ok(());
        }
        let size = u64::from(survivors) * 8;
        self.check_binding("compaction output", size)?;
        session.out_links = self.storage_empty("histopyramid-out-links", size);
        session.out_points = self.storage_empty("histopyramid-out-points", size);
        session.out_capacity = survivors;
        session.shape_group = self.shape_group([
            &session.shape_info,
            &session.points,
            &session.out_links,
            &session.out_points,
        ]);
        Ok(())
    }

    fn pass_group(&self, batch: &BatchInfo, layer: &LayerSettings, chunk: &DispatchChunk) -> wgpu::BindGroup {
        let batch_buffer = self.uniform("histopyramid-batch", batch);
        let layer_buffer = self.uniform("histopyramid-layer", layer);
        let chunk_buffer = self.uniform("histopyramid-chunk", chunk);
        self.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("histopyramid-pass-group"),
            layout: &self.pipelines.pass_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: batch_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: layer_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: chunk_buffer.as_entire_binding(),
                },
            ],
        })
    }

    /// Record `total` invocations of `pipeline`, one compute pass per chunk.
    fn record(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: &wgpu::ComputePipeline,
        session: &GpuSession,
        batch: &BatchInfo,
        layer: &LayerSettings,
        total: u32,
    ) {
        for chunk in dispatch_chunks(total, self.max_workers) {
            let pass_group = self.pass_group(batch, layer, &chunk);
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("histopyramid-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &session.pyramid_group, &[]);
            pass.set_bind_group(1, &session.shape_group, &[]);
            pass.set_bind_group(2, &pass_group, &[]);
            pass.dispatch_workgroups((chunk.count + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE, 1, 1);
        }
    }

    fn encoder(&self) -> wgpu::CommandEncoder {
        self.device().create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("histopyramid-encoder"),
        })
    }

    async fn submit(&self, encoder: wgpu::CommandEncoder) -> PolyResult<()> {
        self.ctx.queue.submit(Some(encoder.finish()));
        self.pop_errors().await
    }

    async fn pop_errors(&self) -> PolyResult<()> {
        match self.device().pop_error_scope().await {
            Some(err) => Err(PolyError::device(err)),
            None => Ok(()),
        }
    }

    /// Copy `count` elements of `source`, starting at element `first`, into a staging buffer and map it.
    async fn read_buffer<T: Pod>(&self, source: &wgpu::Buffer, first: usize, count: usize) -> PolyResult<Vec<T>> {
        let element = std::mem::size_of::<T>() as u64;
        let size = count as u64 * element;
        if size == 0 {
            return Ok(Vec::new());
        }
        let staging = self.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("histopyramid-readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.encoder();
        encoder.copy_buffer_to_buffer(source, first as u64 * element, &staging, 0, size);
        self.ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        self.device().poll(wgpu::Maintain::Wait);
        receiver
            .receive()
            .await
            .ok_or_else(|| PolyError::readback("map_async callback dropped"))?
            .map_err(|err| PolyError::readback(format!("map_async failed: {:?}", err)))?;

        let values = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, T>(&data).to_vec()
        };
        staging.unmap();
        Ok(values)
    }

    fn write_settings(&self, session: &mut GpuSession, thread_count: u32) {
        session.settings = session.settings.with_thread_count(thread_count);
        self.ctx
            .queue
            .write_buffer(&session.settings_buffer, 0, bytemuck::bytes_of(&session.settings));
    }

    fn pass_layer(&self, session: &GpuSession) -> LayerSettings {
        LayerSettings {
            lower_start: 0,
            upper_dim: 0,
            layers: session.layout.layers,
            layer: 0,
        }
    }
}

impl PyramidDevice for GpuDevice {
    type Session = GpuSession;

    fn label(&self) -> &'static str {
        "gpu"
    }

    fn max_layers(&self) -> u32 {
        self.max_layers
    }

    async fn begin(&self, pack: &ShapePack, layout: PyramidLayout, settings: KernelSettings) -> PolyResult<GpuSession> {
        if pack.line_count() != settings.line_count as usize || pack.points.len() != pack.line_count() * 2 {
            return Err(PolyError::buffer(format!(
                "pack holds {} segments and {} coordinates, settings declare {} lines",
                pack.line_count(),
                pack.points.len(),
                settings.line_count
            )));
        }
        let base_size = layout.base_cells() * 8;
        self.check_binding("pyramid base", base_size)?;

        self.device().push_error_scope(wgpu::ErrorFilter::Validation);
        let settings_buffer = self.uniform("histopyramid-settings", &settings);
        let base = self.storage_empty("histopyramid-base", base_size);
        let middle = self.storage_empty("histopyramid-middle", layout.middle_len() as u64 * 4);
        let top = self.storage_empty("histopyramid-top", 16);
        let shape_info = self.storage_init(
            "histopyramid-shape-info",
            bytemuck::cast_slice(&pack.shape_info),
            wgpu::BufferUsages::empty(),
        );
        let points = self.storage_init(
            "histopyramid-points",
            bytemuck::cast_slice(&pack.points),
            wgpu::BufferUsages::empty(),
        );
        let out_links = self.storage_empty("histopyramid-out-links", 0);
        let out_points = self.storage_empty("histopyramid-out-points", 0);

        let pyramid_group = self.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("histopyramid-pyramid-group"),
            layout: &self.pipelines.pyramid_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: settings_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: base.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: middle.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: top.as_entire_binding(),
                },
            ],
        });
        let shape_group = self.shape_group([&shape_info, &points, &out_links, &out_points]);
        self.pop_errors().await?;

        Ok(GpuSession {
            layout,
            settings,
            settings_buffer,
            top,
            pyramid_group,
            shape_info,
            points,
            out_links,
            out_points,
            out_capacity: (MIN_BUFFER_SIZE / 8) as u32,
            shape_group,
        })
    }

    async fn segment_lines(&self, session: &mut GpuSession, batch: &BatchInfo) -> PolyResult<()> {
        let total = u32::try_from(session.layout.base_cells())
            .map_err(|_| PolyError::buffer(format!("{} layers exceed the dispatch range", session.layout.layers)))?;
        self.write_settings(session, total);

        self.device().push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.encoder();
        let layer = self.pass_layer(session);
        self.record(&mut encoder, &self.pipelines.segment_lines, session, batch, &layer, total);
        self.submit(encoder).await
    }

    async fn build_pyramid(&self, session: &mut GpuSession) -> PolyResult<u32> {
        let layout = session.layout;
        let batch = BatchInfo::zeroed();

        self.device().push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.encoder();
        for level in (1..layout.layers).rev() {
            let upper_dim = PyramidLayout::level_width(level);
            let lower_start = if level + 1 < layout.layers {
                layout.level_offset(level + 1) as u32
            } else {
                0
            };
            let layer = LayerSettings {
                lower_start,
                upper_dim,
                layers: layout.layers,
                layer: level,
            };
            self.record(
                &mut encoder,
                &self.pipelines.build_pyramid,
                session,
                &batch,
                &layer,
                upper_dim * upper_dim,
            );
        }
        self.submit(encoder).await?;

        let top: Vec<u32> = self.read_buffer(&session.top, 0, 4).await?;
        Ok(top.iter().sum())
    }

    async fn filter_segments(&self, session: &mut GpuSession, batch: &BatchInfo, survivors: u32) -> PolyResult<()> {
        if survivors == 0 {
            return Ok(());
        }
        self.reserve_outputs(session, survivors)?;
        self.write_settings(session, survivors);

        self.device().push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.encoder();
        let layer = self.pass_layer(session);
        self.record(&mut encoder, &self.pipelines.filter_segments, session, batch, &layer, survivors);
        self.record(&mut encoder, &self.pipelines.apply_filter, session, batch, &layer, survivors);
        self.submit(encoder).await?;

        let last: Vec<[u32; 2]> = self.read_buffer(&session.out_links, survivors as usize - 1, 1).await?;
        if last.first().map_or(false, |decision| decision[0] == u32::MAX) {
            return Err(PolyError::buffer(format!(
                "survivor count {} exceeds pyramid contents",
                survivors
            )));
        }
        Ok(())
    }

    async fn build_new_shapes(&self, session: &mut GpuSession, batch: &BatchInfo, survivors: u32) -> PolyResult<ExtractedShapes> {
        if survivors == 0 {
            return Ok(ExtractedShapes::default());
        }
        self.reserve_outputs(session, survivors)?;
        self.write_settings(session, survivors);

        self.device().push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.encoder();
        let layer = self.pass_layer(session);
        self.record(&mut encoder, &self.pipelines.build_new_shapes, session, batch, &layer, survivors);
        self.submit(encoder).await?;

        let info: Vec<EdgeLink> = self.read_buffer(&session.out_links, 0, survivors as usize).await?;
        let points: Vec<Vec2> = self.read_buffer(&session.out_points, 0, survivors as usize).await?;
        if info.iter().any(|link| link.id == u32::MAX) {
            return Err(PolyError::buffer(format!(
                "build pass found fewer than {} survivors",
                survivors
            )));
        }
        Ok(ExtractedShapes { info, points })
    }

    async fn filter_intersections(&self, session: &mut GpuSession, batch: &BatchInfo, survivors: u32) -> PolyResult<Vec<Vec2>> {
        if survivors == 0 {
            return Ok(Vec::new());
        }
        self.reserve_outputs(session, survivors)?;
        self.write_settings(session, survivors);

        self.device().push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.encoder();
        let layer = self.pass_layer(session);
        self.record(&mut encoder, &self.pipelines.filter_intersections, session, batch, &layer, survivors);
        self.submit(encoder).await?;

        self.read_buffer(&session.out_points, 0, survivors as usize).await
    }

    async fn hole_owners(&self, shapes: &ShapePack, hole_points: &[Vec2]) -> PolyResult<Vec<i32>> {
        if hole_points.is_empty() || shapes.is_empty() {
            return Ok(vec![-1; hole_points.len()]);
        }
        let settings = KernelSettings {
            width: 0,
            thread_count: hole_points.len() as u32,
            line_count: shapes.line_count() as u32,
            write_self: 0,
            max_x: shapes.max_x(),
            layers: 0,
        };
        let total = u64::from(settings.thread_count) * u64::from(settings.line_count);
        self.check_binding("hole crossings", total * 4)?;
        let total = u32::try_from(total)
            .map_err(|_| PolyError::buffer(format!("{} hole/line pairs exceed the dispatch range", total)))?;

        self.device().push_error_scope(wgpu::ErrorFilter::Validation);
        let settings_buffer = self.uniform("histopyramid-hole-settings", &settings);
        let shape_info = self.storage_init(
            "histopyramid-hole-shape-info",
            bytemuck::cast_slice(&shapes.shape_info),
            wgpu::BufferUsages::empty(),
        );
        let points = self.storage_init(
            "histopyramid-hole-shape-points",
            bytemuck::cast_slice(&shapes.points),
            wgpu::BufferUsages::empty(),
        );
        let hole_starts = self.storage_init(
            "histopyramid-hole-points",
            bytemuck::cast_slice(hole_points),
            wgpu::BufferUsages::empty(),
        );
        let crossings = self.storage_empty("histopyramid-hole-crossings", u64::from(total) * 4);
        let owners = self.storage_empty("histopyramid-hole-owners", u64::from(settings.thread_count) * 4);

        let settings_group = self.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("histopyramid-hole-settings-group"),
            layout: &self.pipelines.hole_settings_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: settings_buffer.as_entire_binding(),
            }],
        });
        let data_group = self.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("histopyramid-hole-data-group"),
            layout: &self.pipelines.hole_data_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: shape_info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: points.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: hole_starts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: crossings.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: owners.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self.encoder();
        let passes = [
            (&self.pipelines.hole_winding, total),
            (&self.pipelines.hole_reduce, settings.thread_count),
        ];
        for (pipeline, count) in passes {
            for chunk in dispatch_chunks(count, self.max_workers) {
                let chunk_buffer = self.uniform("histopyramid-hole-chunk", &chunk);
                let chunk_group = self.device().create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("histopyramid-hole-pass-group"),
                    layout: &self.pipelines.hole_pass_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: chunk_buffer.as_entire_binding(),
                    }],
                });
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("histopyramid-hole-pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &settings_group, &[]);
                pass.set_bind_group(1, &data_group, &[]);
                pass.set_bind_group(2, &chunk_group, &[]);
                pass.dispatch_workgroups((chunk.count + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE, 1, 1);
            }
        }
        self.submit(encoder).await?;

        self.read_buffer(&owners, 0, hole_points.len()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Shape;
    use crate::histopyramid::{HistoPyramidEngine, HostDevice};

    async fn device() -> Option<GpuDevice> {
        match crate::gpu::acquire().await {
            Ok(ctx) => Some(GpuDevice::new(ctx, &EngineConfig::default())),
            Err(err) => {
                eprintln!("skipping GPU test: {}", err);
                None
            }
        }
    }

    #[tokio::test]
    async fn test_gpu_matches_host_survivors() {
        let Some(device) = device().await else {
            return;
        };
        let input = vec![
            Shape::rect(Vec2::ZERO, Vec2::ONE),
            Shape::rect(Vec2::splat(0.5), Vec2::splat(1.5)),
        ];
        let gpu = HistoPyramidEngine::new(device, EngineConfig::default());
        let host = HistoPyramidEngine::new(HostDevice::default(), EngineConfig::default());

        let gpu_out = gpu.union(&input).await.unwrap();
        let host_out = host.union(&input).await.unwrap();
        assert_eq!(gpu_out.len(), host_out.len());
        assert_eq!(gpu_out[0].nodes.len(), host_out[0].nodes.len());
        assert_eq!(
            gpu.last_stats().unwrap().survivors_per_batch,
            host.last_stats().unwrap().survivors_per_batch
        );
    }

    #[tokio::test]
    async fn test_gpu_hole_owner() {
        let Some(device) = device().await else {
            return;
        };
        let outer = ShapePack::pack(&[Shape::rect(Vec2::ZERO, Vec2::splat(4.0))]);
        let owners = device
            .hole_owners(&outer, &[Vec2::splat(1.0), Vec2::splat(9.0)])
            .await
            .unwrap();
        assert_eq!(owners, vec![0, -1]);
    }
}
