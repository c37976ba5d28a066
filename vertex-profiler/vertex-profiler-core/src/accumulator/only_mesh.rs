//! OnlyMesh: renderer-id raster, per-renderer visible pixel counts, colorized by owner density.

use crate::accumulator::raster::{MeshRaster, RasterTarget, DEPTH_FORMAT, RENDERER_DEPTH, RENDERER_IDS, RENDERER_ID_FORMAT};
use crate::accumulator::{
    begin_compute, dispatch_per_pixel, pipelines_or_disabled, Accumulator, AccumulatorBase, CounterKind,
    CounterSource, FrameContext,
};
use crate::config::{CullMode, Mode};
use crate::error::ProfilerResult;
use crate::gpu;
use crate::tiles::TileGrid;

const ONLY_MESH_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/only_mesh.wgsl"));

const PIXEL_COUNTS: &str = "pixel_counts";

struct Pipelines {
    raster: MeshRaster,
    group0_layout: wgpu::BindGroupLayout,
    count_pixels: wgpu::ComputePipeline,
    colorize: wgpu::ComputePipeline,
}

pub struct OnlyMeshAccumulator {
    base: AccumulatorBase,
    pipelines: Option<Pipelines>,
}

impl OnlyMeshAccumulator {
    pub fn new(device: &wgpu::Device, cull_mode: CullMode) -> Self {
        let base = AccumulatorBase::new(device);
        let built = gpu::validated(device, || {
            let group0_layout = base.compute_layout(
                device,
                "only_mesh_bind_group_layout_0",
                &[
                    gpu::texture_entry(3, wgpu::ShaderStages::COMPUTE, wgpu::TextureSampleType::Uint),
                    gpu::storage_entry(4, wgpu::ShaderStages::COMPUTE, false),
                ],
            );
            let (_, per_pixel) = base.pipeline_layouts(device, &group0_layout);
            let shader = gpu::create_shader(device, "only_mesh_shader", &[ONLY_MESH_SHADER], true);
            Pipelines {
                raster: MeshRaster::new(device, &base.mesh_layout, RasterTarget::RendererId, cull_mode),
                count_pixels: gpu::compute_pipeline(device, "only_mesh_count_pixels", &per_pixel, &shader, "count_pixels"),
                colorize: gpu::compute_pipeline(device, "only_mesh_colorize", &per_pixel, &shader, "colorize"),
                group0_layout,
            }
        });
        Self { pipelines: pipelines_or_disabled(Mode::OnlyMesh, built), base }
    }
}

impl Accumulator for OnlyMeshAccumulator {
    fn mode(&self) -> Mode {
        Mode::OnlyMesh
    }

    fn enabled(&self) -> bool {
        self.pipelines.is_some()
    }

    fn prepare_frame(&mut self, ctx: &FrameContext<'_>) -> ProfilerResult<()> {
        self.base.prepare(ctx)?;
        if let Some(p) = self.pipelines.as_mut() {
            p.raster.prepare(ctx.device, self.base.frame_params()?);
        }
        self.base.ensure_counters(ctx.device, PIXEL_COUNTS, ctx.records.len() as u64);
        self.base.ensure_target(
            ctx,
            RENDERER_IDS,
            RENDERER_ID_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        self.base.ensure_target(ctx, RENDERER_DEPTH, DEPTH_FORMAT, wgpu::TextureUsages::RENDER_ATTACHMENT);
        Ok(())
    }

    fn accumulate(&self, encoder: &mut wgpu::CommandEncoder, ctx: &FrameContext<'_>) -> ProfilerResult<()> {
        let Some(p) = &self.pipelines else { return Ok(()) };
        self.base.clear_counters(encoder, &[PIXEL_COUNTS])?;
        let meshes = self.base.mesh_bindings(ctx);
        let ids = self.base.pool.view(RENDERER_IDS)?;
        p.raster.encode(encoder, ctx, ids, Some(self.base.pool.view(RENDERER_DEPTH)?), &meshes)?;
        let group0 = self.base.compute_bind_group(
            ctx.device,
            "only_mesh_bind_group_0",
            &p.group0_layout,
            vec![
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(ids) },
                wgpu::BindGroupEntry { binding: 4, resource: self.base.pool.buffer(PIXEL_COUNTS)?.as_entire_binding() },
            ],
        )?;
        let mut pass = begin_compute(encoder, "only_mesh_pass");
        dispatch_per_pixel(&mut pass, &p.count_pixels, &group0, ctx);
        dispatch_per_pixel(&mut pass, &p.colorize, &group0, ctx);
        Ok(())
    }

    fn readback_sources(&self) -> Vec<CounterSource<'_>> {
        self.base.counter_source(CounterKind::RendererPixels).into_iter().collect()
    }

    fn profiler_view(&self) -> Option<&wgpu::TextureView> {
        self.base.profiler_view()
    }

    fn counter_bytes(&self, _grid: &TileGrid, records: usize) -> u64 {
        records as u64 * 4
    }
}
