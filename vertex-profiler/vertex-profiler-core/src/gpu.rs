//! Shared GPU plumbing: uniform layouts, bind group layout helpers, shader assembly and validation.

use glam::Mat4;

use crate::collector::RendererRecord;
use crate::config::HeatMapConfig;
use crate::tiles::TileGrid;

const COMMON_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/common.wgsl"));
const COMPUTE_BINDINGS_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/compute_bindings.wgsl"));

/// Size of one renderer parameter block; also the uniform offset alignment it is bound at.
pub const RENDERER_PARAMS_SIZE: u64 = 256;
pub const FRAME_PARAMS_SIZE: u64 = 128;

/// Workgroup width of per-vertex and per-element passes.
pub const LINEAR_WORKGROUP: u32 = 64;
/// Workgroup edge of per-pixel passes.
pub const PIXEL_WORKGROUP: u32 = 8;
const MAX_DISPATCH: u32 = 65_535;

/// Per-renderer block, matches `RendererParams` in common.wgsl.
/// `info` = (renderer_id, vertex_count, vertex_stride_floats, 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuRendererParams {
    pub model: [f32; 16],
    pub info: [u32; 4],
    pub _pad: [[u32; 4]; 11],
}

/// Per-frame uniform, matches `FrameParams` in common.wgsl.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuFrameParams {
    pub view_proj: [f32; 16],
    /// (width, height, 1/width, 1/height)
    pub screen: [f32; 4],
    /// (tile_width, tile_height, num_x, num_y)
    pub tile: [u32; 4],
    /// (renderer_count, color_range_count, heat_range, heat_step)
    pub counts: [u32; 4],
    /// (ramp_min, ramp_max, overlay_alpha, hot_tile_threshold)
    pub heat: [f32; 4],
}

impl GpuFrameParams {
    pub fn new(
        view_proj: &Mat4,
        grid: &TileGrid,
        renderer_count: u32,
        color_range_count: u32,
        heat_map: &HeatMapConfig,
        overlay_alpha: f32,
        hot_tile_threshold: f32,
    ) -> Self {
        let (w, h) = (grid.screen_width as f32, grid.screen_height as f32);
        Self {
            view_proj: view_proj.to_cols_array(),
            screen: [w, h, 1.0 / w, 1.0 / h],
            tile: [grid.tile_width, grid.tile_height, grid.num_x, grid.num_y],
            counts: [renderer_count, color_range_count, heat_map.range, heat_map.step],
            heat: [heat_map.ramp_min, heat_map.ramp_max, overlay_alpha, hot_tile_threshold],
        }
    }
}

/// Joins the shared WGSL prelude with mode-specific sources.
pub fn shader_source(parts: &[&str], compute: bool) -> String {
    let mut src = String::from(COMMON_SHADER);
    if compute {
        src.push('\n');
        src.push_str(COMPUTE_BINDINGS_SHADER);
    }
    for part in parts {
        src.push('\n');
        src.push_str(part);
    }
    src
}

pub fn create_shader(device: &wgpu::Device, label: &str, parts: &[&str], compute: bool) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(shader_source(parts, compute).into()),
    })
}

/// Runs `build` inside a validation error scope. Blocks on the scope result, so
/// only call it while constructing pipelines, never per frame.
pub fn validated<T>(device: &wgpu::Device, build: impl FnOnce() -> T) -> Result<T, String> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(value),
        Some(err) => Err(err.to_string()),
    }
}

/// Workgroup counts covering `n` invocations of a 1D pass, folded into y past the dispatch limit.
pub fn linear_dispatch(n: u32) -> (u32, u32) {
    let groups = n.div_ceil(LINEAR_WORKGROUP).max(1);
    if groups <= MAX_DISPATCH {
        (groups, 1)
    } else {
        (MAX_DISPATCH, groups.div_ceil(MAX_DISPATCH))
    }
}

pub fn pixel_dispatch(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(PIXEL_WORKGROUP), height.div_ceil(PIXEL_WORKGROUP))
}

pub fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages, size: u64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: std::num::NonZeroU64::new(size),
        },
        count: None,
    }
}

pub fn storage_entry(binding: u32, visibility: wgpu::ShaderStages, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub fn texture_entry(binding: u32, visibility: wgpu::ShaderStages, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

pub fn storage_texture_entry(binding: u32, format: wgpu::TextureFormat) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

/// Group 1 of every profiler pipeline: the record's parameter block and its vertex buffer.
pub fn mesh_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let visibility = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::COMPUTE;
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("profiler_mesh_bind_group_layout"),
        entries: &[uniform_entry(0, visibility, RENDERER_PARAMS_SIZE), storage_entry(1, visibility, true)],
    })
}

pub fn mesh_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    renderer_params: &wgpu::Buffer,
    record: &RendererRecord,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("profiler_mesh_bind_group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: renderer_params,
                    offset: record.id as u64 * RENDERER_PARAMS_SIZE,
                    size: std::num::NonZeroU64::new(RENDERER_PARAMS_SIZE),
                }),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: record.mesh.vertex_buf.as_entire_binding(),
            },
        ],
    })
}

/// Group 0 of the raster stages: only the frame uniform.
pub fn frame_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("profiler_frame_bind_group_layout"),
        entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT, FRAME_PARAMS_SIZE)],
    })
}

pub fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layouts_match_wgsl_sizes() {
        assert_eq!(std::mem::size_of::<GpuRendererParams>() as u64, RENDERER_PARAMS_SIZE);
        assert_eq!(std::mem::size_of::<GpuFrameParams>() as u64, FRAME_PARAMS_SIZE);
        assert_eq!(std::mem::size_of::<crate::classifier::GpuColorRange>(), 32);
    }

    #[test]
    fn linear_dispatch_folds_past_limit() {
        assert_eq!(linear_dispatch(0), (1, 1));
        assert_eq!(linear_dispatch(64), (1, 1));
        assert_eq!(linear_dispatch(65), (2, 1));
        let (x, y) = linear_dispatch(10_000_000);
        assert_eq!(x, MAX_DISPATCH);
        assert!(x as u64 * y as u64 * LINEAR_WORKGROUP as u64 >= 10_000_000);
    }

    #[test]
    fn frame_params_pack_grid_and_heat() {
        let grid = TileGrid::new(1920, 1080, 100, 100);
        let heat = HeatMapConfig::default();
        let params = GpuFrameParams::new(&Mat4::IDENTITY, &grid, 12, 8, &heat, 0.5, 250.0);
        assert_eq!(params.tile, [100, 100, 20, 11]);
        assert_eq!(params.counts, [12, 8, heat.range, heat.step]);
        assert_eq!(params.heat[3], 250.0);
        assert_eq!(params.screen[0], 1920.0);
    }

    #[test]
    fn compute_sources_include_bindings() {
        let raster = shader_source(&["// raster"], false);
        let compute = shader_source(&["// compute"], true);
        assert!(!raster.contains("profiler_out"));
        assert!(compute.contains("profiler_out"));
        assert!(compute.ends_with("// compute"));
    }
}
