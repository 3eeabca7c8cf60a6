// src/histopyramid/gpu/pipelines.rs
// Process-wide cache of the compiled HistoPyramid compute pipelines and their explicit bind group layouts.
// This file exists to compile the WGSL modules once and share them, immutable, across every GPU session.
// RELEVANT FILES:src/shaders/*.wgsl,src/histopyramid/gpu/mod.rs,src/gpu.rs

use once_cell::sync::OnceCell;
use wgpu::{BindGroupLayout, ComputePipeline, Device};

/// Invocations per workgroup baked into every kernel.
pub const WORKGROUP_SIZE: u32 = 256;

const PYRAMID_SOURCE: &str = concat!(
    include_str!("../../shaders/common.wgsl"),
    include_str!("../../shaders/pyramid_bindings.wgsl"),
    include_str!("../../shaders/lines.wgsl"),
    include_str!("../../shaders/pyramid.wgsl"),
    include_str!("../../shaders/segment_lines.wgsl"),
    include_str!("../../shaders/build_pyramid.wgsl"),
    include_str!("../../shaders/filter_segments.wgsl"),
    include_str!("../../shaders/build_new_shapes.wgsl"),
    include_str!("../../shaders/filter_intersections.wgsl"),
);

const HOLE_SOURCE: &str = concat!(
    include_str!("../../shaders/common.wgsl"),
    include_str!("../../shaders/hole_bindings.wgsl"),
    include_str!("../../shaders/lines.wgsl"),
    include_str!("../../shaders/hole_winding.wgsl"),
);

static PIPELINES: OnceCell<Pipelines> = OnceCell::new();

/// Compiled kernels plus the layouts their bind groups are created from.
pub struct Pipelines {
    pub pyramid_layout: BindGroupLayout,
    pub shape_layout: BindGroupLayout,
    pub pass_layout: BindGroupLayout,
    pub hole_settings_layout: BindGroupLayout,
    pub hole_data_layout: BindGroupLayout,
    pub hole_pass_layout: BindGroupLayout,

    pub segment_lines: ComputePipeline,
    pub build_pyramid: ComputePipeline,
    pub filter_segments: ComputePipeline,
    pub apply_filter: ComputePipeline,
    pub build_new_shapes: ComputePipeline,
    pub filter_intersections: ComputePipeline,
    pub hole_winding: ComputePipeline,
    pub hole_reduce: ComputePipeline,
}

impl Pipelines {
    /// Compile on first use; later calls return the cached set.
    pub fn get(device: &Device) -> &'static Pipelines {
        PIPELINES.get_or_init(|| Self::create(device))
    }

    fn create(device: &Device) -> Self {
        let pyramid_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("histopyramid-pyramid-layout"),
            entries: &[
                // @binding(0) settings
                uniform_entry(0),
                // @binding(1) base (angle, value)
                storage_entry(1, false),
                // @binding(2) middle levels
                storage_entry(2, false),
                // @binding(3) top 2x2
                storage_entry(3, false),
            ],
        });
        let shape_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("histopyramid-shape-layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                storage_entry(3, false),
            ],
        });
        let pass_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("histopyramid-pass-layout"),
            entries: &[uniform_entry(0), uniform_entry(1), uniform_entry(2)],
        });
        let hole_settings_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("histopyramid-hole-settings-layout"),
            entries: &[uniform_entry(0)],
        });
        let hole_data_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("histopyramid-hole-data-layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
                storage_entry(4, false),
            ],
        });
        let hole_pass_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("histopyramid-hole-pass-layout"),
            entries: &[uniform_entry(0)],
        });

        let pyramid_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("histopyramid-pipeline-layout"),
            bind_group_layouts: &[&pyramid_layout, &shape_layout, &pass_layout],
            push_constant_ranges: &[],
        });
        let hole_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("histopyramid-hole-pipeline-layout"),
            bind_group_layouts: &[&hole_settings_layout, &hole_data_layout, &hole_pass_layout],
            push_constant_ranges: &[],
        });

        let pyramid_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("HistoPyramid Kernels"),
            source: wgpu::ShaderSource::Wgsl(PYRAMID_SOURCE.into()),
        });
        let hole_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("HistoPyramid Hole Kernels"),
            source: wgpu::ShaderSource::Wgsl(HOLE_SOURCE.into()),
        });

        let compute = |label: &str, layout: &wgpu::PipelineLayout, module: &wgpu::ShaderModule, entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                module,
                entry_point,
            })
        };

        Self {
            segment_lines: compute("Segment Lines Pipeline", &pyramid_pipeline_layout, &pyramid_shader, "segment_lines"),
            build_pyramid: compute("Build Pyramid Pipeline", &pyramid_pipeline_layout, &pyramid_shader, "build_pyramid"),
            filter_segments: compute("Filter Segments Pipeline", &pyramid_pipeline_layout, &pyramid_shader, "filter_segments"),
            apply_filter: compute("Apply Filter Pipeline", &pyramid_pipeline_layout, &pyramid_shader, "apply_filter"),
            build_new_shapes: compute("Build New Shapes Pipeline", &pyramid_pipeline_layout, &pyramid_shader, "build_new_shapes"),
            filter_intersections: compute(
                "Filter Intersections Pipeline",
                &pyramid_pipeline_layout,
                &pyramid_shader,
                "filter_intersections",
            ),
            hole_winding: compute("Hole Winding Pipeline", &hole_pipeline_layout, &hole_shader, "hole_winding"),
            hole_reduce: compute("Hole Reduce Pipeline", &hole_pipeline_layout, &hole_shader, "hole_reduce"),
            pyramid_layout,
            shape_layout,
            pass_layout,
            hole_settings_layout,
            hole_data_layout,
            hole_pass_layout,
        }
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
