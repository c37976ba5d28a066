//! Density accumulators: one GPU pipeline set per profiling mode, built fresh per session.
//!
//! Every mode shares the same bind group scheme. Group 0 holds the frame uniform
//! (binding 0), the colour table (1), the colorized output (2) and mode-specific
//! counters from binding 3 on. Group 1 holds the current record's parameter block
//! and vertex buffer and is only present in per-vertex and raster pipelines.

mod heat_map;
mod only_mesh;
mod only_tile;
mod overdraw;
mod raster;
mod tile_based_mesh;

pub use heat_map::{bake_ramp, MeshHeatMapAccumulator, RAMP_WIDTH};
pub use only_mesh::OnlyMeshAccumulator;
pub use only_tile::OnlyTileAccumulator;
pub use overdraw::OverdrawAccumulator;
pub use tile_based_mesh::TileBasedMeshAccumulator;

use glam::Mat4;

use crate::classifier::{ColorRangeSetting, GpuColorRange};
use crate::collector::RendererRecord;
use crate::config::{Mode, ProfilerConfig};
use crate::culler::VisibilitySet;
use crate::error::{ProfilerError, ProfilerResult};
use crate::gpu::{self, GpuFrameParams, FRAME_PARAMS_SIZE};
use crate::resources::{BufferSignature, ResourcePool, TextureSignature};
use crate::tiles::TileGrid;

pub const PROFILER_COLOR: &str = "profiler_color";
const FRAME_PARAMS: &str = "frame_params";
const COLOR_RANGES: &str = "color_ranges";

pub const PROFILER_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Everything an accumulator reads for one frame.
pub struct FrameContext<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub view_proj: Mat4,
    pub grid: TileGrid,
    pub records: &'a [RendererRecord],
    /// Bumped whenever `records` or the parameter buffer changed.
    pub records_generation: u64,
    pub visibility: &'a VisibilitySet,
    pub renderer_params: &'a wgpu::Buffer,
    pub color_ranges: &'a ColorRangeSetting,
    pub color_ranges_version: u64,
    /// Raw per-tile vertex count above which a tile is hot.
    pub hot_tile_threshold: f32,
    pub config: &'a ProfilerConfig,
}

impl FrameContext<'_> {
    pub fn width(&self) -> u32 {
        self.grid.screen_width
    }

    pub fn height(&self) -> u32 {
        self.grid.screen_height
    }

    pub fn renderer_count(&self) -> u32 {
        self.records.len() as u32
    }
}

/// Counter buffers a mode can hand to the readback pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CounterKind {
    TileVertices,
    RendererPixels,
    TileRendererVertices,
    TileRendererPixels,
}

impl CounterKind {
    pub fn label(self) -> &'static str {
        match self {
            CounterKind::TileVertices => "tile_counts",
            CounterKind::RendererPixels => "pixel_counts",
            CounterKind::TileRendererVertices => "tile_mesh_vertices",
            CounterKind::TileRendererPixels => "tile_mesh_pixels",
        }
    }
}

pub struct CounterSource<'a> {
    pub kind: CounterKind,
    pub buffer: &'a wgpu::Buffer,
    pub size: u64,
}

/// One mode's GPU pipelines and pooled resources.
pub trait Accumulator: Send {
    fn mode(&self) -> Mode;

    /// False when a shader module or pipeline failed validation.
    fn enabled(&self) -> bool;

    /// Size pooled resources to this frame and upload uniforms.
    fn prepare_frame(&mut self, ctx: &FrameContext<'_>) -> ProfilerResult<()>;

    /// Clear counters, then record the accumulate and colorize passes.
    fn accumulate(&self, encoder: &mut wgpu::CommandEncoder, ctx: &FrameContext<'_>) -> ProfilerResult<()>;

    /// Counter buffers to copy out for sample assembly. Empty for display-only modes.
    fn readback_sources(&self) -> Vec<CounterSource<'_>> {
        Vec::new()
    }

    /// Colorized profiler layer, valid after `prepare_frame`.
    fn profiler_view(&self) -> Option<&wgpu::TextureView>;

    /// Largest counter buffer this mode binds for `grid` and `records`, in bytes.
    fn counter_bytes(&self, _grid: &TileGrid, _records: usize) -> u64 {
        0
    }
}

/// Whether one storage binding of `bytes` fits the device.
pub fn counters_fit(bytes: u64, limits: &wgpu::Limits) -> bool {
    bytes <= u64::from(limits.max_storage_buffer_binding_size) && bytes <= limits.max_buffer_size
}

/// Build the accumulator session for `mode`; `None` for `Mode::None`.
pub fn build_accumulator(device: &wgpu::Device, mode: Mode, config: &ProfilerConfig) -> Option<Box<dyn Accumulator>> {
    let acc: Box<dyn Accumulator> = match mode {
        Mode::None => return None,
        Mode::OnlyTile => Box::new(OnlyTileAccumulator::new(device)),
        Mode::OnlyMesh => Box::new(OnlyMeshAccumulator::new(device, config.cull_mode)),
        Mode::TileBasedMesh => Box::new(TileBasedMeshAccumulator::new(device, config.cull_mode)),
        Mode::MeshHeatMap => Box::new(MeshHeatMapAccumulator::new(device, config)),
        Mode::Overdraw => Box::new(OverdrawAccumulator::new(device, config.cull_mode)),
    };
    Some(acc)
}

/// Logs and flattens a pipeline validation result.
fn pipelines_or_disabled<T>(mode: Mode, built: Result<T, String>) -> Option<T> {
    match built {
        Ok(p) => Some(p),
        Err(message) => {
            log::warn!("{}", ProfilerError::PipelineValidation { mode, message });
            None
        }
    }
}

/// Group 1 binding of one visible record.
pub(crate) struct MeshBinding<'a> {
    pub record: usize,
    pub vertex_count: u32,
    pub bind_group: &'a wgpu::BindGroup,
}

/// Pool, layouts and uploads shared by every mode.
pub(crate) struct AccumulatorBase {
    pub pool: ResourcePool,
    pub mesh_layout: wgpu::BindGroupLayout,
    color_ranges_version: Option<u64>,
    /// Group 1 of every record, indexed by record id.
    mesh_groups: Vec<wgpu::BindGroup>,
    mesh_groups_generation: Option<u64>,
}

impl AccumulatorBase {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            pool: ResourcePool::default(),
            mesh_layout: gpu::mesh_bind_group_layout(device),
            color_ranges_version: None,
            mesh_groups: Vec::new(),
            mesh_groups_generation: None,
        }
    }

    /// Group 0 layout: shared bindings 0..=2 followed by `mode_entries`.
    pub fn compute_layout(
        &self,
        device: &wgpu::Device,
        label: &str,
        mode_entries: &[wgpu::BindGroupLayoutEntry],
    ) -> wgpu::BindGroupLayout {
        let mut entries = vec![
            gpu::uniform_entry(0, wgpu::ShaderStages::COMPUTE, FRAME_PARAMS_SIZE),
            gpu::storage_entry(1, wgpu::ShaderStages::COMPUTE, true),
            gpu::storage_texture_entry(2, PROFILER_COLOR_FORMAT),
        ];
        entries.extend_from_slice(mode_entries);
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor { label: Some(label), entries: &entries })
    }

    /// Layouts for per-vertex (groups 0 + 1) and per-pixel (group 0) pipelines.
    pub fn pipeline_layouts(
        &self,
        device: &wgpu::Device,
        group0: &wgpu::BindGroupLayout,
    ) -> (wgpu::PipelineLayout, wgpu::PipelineLayout) {
        let per_vertex = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("profiler_vertex_pipeline_layout"),
            bind_group_layouts: &[group0, &self.mesh_layout],
            push_constant_ranges: &[],
        });
        let per_pixel = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("profiler_pixel_pipeline_layout"),
            bind_group_layouts: &[group0],
            push_constant_ranges: &[],
        });
        (per_vertex, per_pixel)
    }

    /// Frame uniform every frame, colour table when its version moved, mesh groups when the
    /// records moved, output texture on resize.
    pub fn prepare(&mut self, ctx: &FrameContext<'_>) -> ProfilerResult<()> {
        let device = ctx.device;
        self.pool.ensure_buffer(
            device,
            FRAME_PARAMS,
            BufferSignature {
                size: FRAME_PARAMS_SIZE,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            },
        );
        let frame = GpuFrameParams::new(
            &ctx.view_proj,
            &ctx.grid,
            ctx.renderer_count(),
            ctx.color_ranges.len() as u32,
            &ctx.config.heat_map,
            ctx.config.overlay_opacity,
            ctx.hot_tile_threshold,
        );
        ctx.queue.write_buffer(self.pool.buffer(FRAME_PARAMS)?, 0, bytemuck::bytes_of(&frame));

        let ranges: Vec<GpuColorRange> = ctx.color_ranges.to_gpu();
        let reallocated = self.pool.ensure_buffer(
            device,
            COLOR_RANGES,
            BufferSignature {
                size: (ranges.len() * std::mem::size_of::<GpuColorRange>()) as u64,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            },
        );
        if reallocated || self.color_ranges_version != Some(ctx.color_ranges_version) {
            ctx.queue.write_buffer(self.pool.buffer(COLOR_RANGES)?, 0, bytemuck::cast_slice(&ranges));
            self.color_ranges_version = Some(ctx.color_ranges_version);
        }

        if self.mesh_groups_generation != Some(ctx.records_generation) {
            self.mesh_groups = ctx
                .records
                .iter()
                .map(|record| gpu::mesh_bind_group(device, &self.mesh_layout, ctx.renderer_params, record))
                .collect();
            self.mesh_groups_generation = Some(ctx.records_generation);
            log::debug!("rebuilt {} mesh bind groups", self.mesh_groups.len());
        }

        self.pool.ensure_texture(
            device,
            PROFILER_COLOR,
            TextureSignature {
                width: ctx.width(),
                height: ctx.height(),
                format: PROFILER_COLOR_FORMAT,
                usage: wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
            },
        );
        Ok(())
    }

    /// `u32` counter array with room for `len` entries.
    pub fn ensure_counters(&mut self, device: &wgpu::Device, name: &'static str, len: u64) {
        self.pool.ensure_buffer(
            device,
            name,
            BufferSignature {
                size: len.max(1) * 4,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            },
        );
    }

    /// Screen-sized render target.
    pub fn ensure_target(
        &mut self,
        ctx: &FrameContext<'_>,
        name: &'static str,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) {
        self.pool.ensure_texture(
            ctx.device,
            name,
            TextureSignature { width: ctx.width(), height: ctx.height(), format, usage },
        );
    }

    /// Bindings 0..=2 of group 0.
    pub fn shared_entries(&self) -> ProfilerResult<[wgpu::BindGroupEntry<'_>; 3]> {
        Ok([
            wgpu::BindGroupEntry { binding: 0, resource: self.pool.buffer(FRAME_PARAMS)?.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 1, resource: self.pool.buffer(COLOR_RANGES)?.as_entire_binding() },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(self.pool.view(PROFILER_COLOR)?),
            },
        ])
    }

    pub fn compute_bind_group(
        &self,
        device: &wgpu::Device,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        mode_entries: Vec<wgpu::BindGroupEntry<'_>>,
    ) -> ProfilerResult<wgpu::BindGroup> {
        let mut entries = self.shared_entries()?.to_vec();
        entries.extend(mode_entries);
        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor { label: Some(label), layout, entries: &entries }))
    }

    pub fn frame_params(&self) -> ProfilerResult<&wgpu::Buffer> {
        self.pool.buffer(FRAME_PARAMS)
    }

    /// Visible enabled records with their cached group 1.
    pub fn mesh_bindings(&self, ctx: &FrameContext<'_>) -> Vec<MeshBinding<'_>> {
        ctx.visibility
            .iter_visible()
            .filter_map(|i| Some((i, ctx.records.get(i)?, self.mesh_groups.get(i)?)))
            .filter(|(_, record, _)| record.enabled)
            .map(|(i, record, bind_group)| MeshBinding { record: i, vertex_count: record.vertex_count(), bind_group })
            .collect()
    }

    pub fn clear_counters(&self, encoder: &mut wgpu::CommandEncoder, names: &[&'static str]) -> ProfilerResult<()> {
        for &name in names {
            encoder.clear_buffer(self.pool.buffer(name)?, 0, None);
        }
        Ok(())
    }

    pub fn profiler_view(&self) -> Option<&wgpu::TextureView> {
        self.pool.view(PROFILER_COLOR).ok()
    }

    pub fn counter_source(&self, kind: CounterKind) -> Option<CounterSource<'_>> {
        let buffer = self.pool.buffer(kind.label()).ok()?;
        Some(CounterSource { kind, buffer, size: buffer.size() })
    }
}

/// One dispatch per visible record of a per-vertex pipeline.
pub(crate) fn dispatch_per_vertex(
    pass: &mut wgpu::ComputePass<'_>,
    pipeline: &wgpu::ComputePipeline,
    group0: &wgpu::BindGroup,
    meshes: &[MeshBinding<'_>],
) {
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, group0, &[]);
    for mesh in meshes {
        let (x, y) = gpu::linear_dispatch(mesh.vertex_count);
        pass.set_bind_group(1, mesh.bind_group, &[]);
        pass.dispatch_workgroups(x, y, 1);
    }
}

/// One screen-covering dispatch of a per-pixel pipeline.
pub(crate) fn dispatch_per_pixel(
    pass: &mut wgpu::ComputePass<'_>,
    pipeline: &wgpu::ComputePipeline,
    group0: &wgpu::BindGroup,
    ctx: &FrameContext<'_>,
) {
    let (x, y) = gpu::pixel_dispatch(ctx.width(), ctx.height());
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, group0, &[]);
    pass.dispatch_workgroups(x, y, 1);
}

pub(crate) fn begin_compute<'e>(encoder: &'e mut wgpu::CommandEncoder, label: &str) -> wgpu::ComputePass<'e> {
    encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some(label), timestamp_writes: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_labels_are_distinct() {
        let kinds = [
            CounterKind::TileVertices,
            CounterKind::RendererPixels,
            CounterKind::TileRendererVertices,
            CounterKind::TileRendererPixels,
        ];
        let mut labels: Vec<_> = kinds.iter().map(|k| k.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), kinds.len());
    }

    #[test]
    fn counter_budget_follows_device_limits() {
        let limits = wgpu::Limits::default();
        let max = u64::from(limits.max_storage_buffer_binding_size);
        assert!(counters_fit(0, &limits));
        assert!(counters_fit(max, &limits));
        assert!(!counters_fit(max + 4, &limits));
        let raised = wgpu::Limits { max_storage_buffer_binding_size: u32::MAX, ..wgpu::Limits::default() };
        assert!(!counters_fit(raised.max_buffer_size + 4, &raised));
    }

    #[test]
    fn disabled_build_is_logged_not_fatal() {
        assert_eq!(pipelines_or_disabled::<u32>(Mode::Overdraw, Err("bad wgsl".into())), None);
        assert_eq!(pipelines_or_disabled(Mode::Overdraw, Ok(3u32)), Some(3));
    }
}
