//! TileBasedMesh: tile totals plus tile x renderer vertex and pixel counters. Only hot tiles are colorized.

use crate::accumulator::raster::{MeshRaster, RasterTarget, DEPTH_FORMAT, RENDERER_DEPTH, RENDERER_IDS, RENDERER_ID_FORMAT};
use crate::accumulator::{
    begin_compute, dispatch_per_pixel, dispatch_per_vertex, pipelines_or_disabled, Accumulator, AccumulatorBase,
    CounterKind, CounterSource, FrameContext,
};
use crate::config::{CullMode, Mode};
use crate::error::ProfilerResult;
use crate::gpu;
use crate::tiles::TileGrid;

const TILE_BASED_MESH_SHADER: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/tile_based_mesh.wgsl"));

const TILE_COUNTS: &str = "tile_counts";
const TILE_MESH_VERTICES: &str = "tile_mesh_vertices";
const TILE_MESH_PIXELS: &str = "tile_mesh_pixels";

/// Bytes of one tile×renderer counter array.
pub fn tile_mesh_counter_bytes(tiles: u32, records: usize) -> u64 {
    u64::from(tiles) * records as u64 * 4
}

struct Pipelines {
    raster: MeshRaster,
    group0_layout: wgpu::BindGroupLayout,
    count_vertices: wgpu::ComputePipeline,
    count_pixels: wgpu::ComputePipeline,
    colorize: wgpu::ComputePipeline,
}

pub struct TileBasedMeshAccumulator {
    base: AccumulatorBase,
    pipelines: Option<Pipelines>,
}

impl TileBasedMeshAccumulator {
    pub fn new(device: &wgpu::Device, cull_mode: CullMode) -> Self {
        let base = AccumulatorBase::new(device);
        let built = gpu::validated(device, || {
            let group0_layout = base.compute_layout(
                device,
                "tile_based_mesh_bind_group_layout_0",
                &[
                    gpu::texture_entry(3, wgpu::ShaderStages::COMPUTE, wgpu::TextureSampleType::Uint),
                    gpu::storage_entry(4, wgpu::ShaderStages::COMPUTE, false),
                    gpu::storage_entry(5, wgpu::ShaderStages::COMPUTE, false),
                    gpu::storage_entry(6, wgpu::ShaderStages::COMPUTE, false),
                ],
            );
            let (per_vertex, per_pixel) = base.pipeline_layouts(device, &group0_layout);
            let shader = gpu::create_shader(device, "tile_based_mesh_shader", &[TILE_BASED_MESH_SHADER], true);
            Pipelines {
                raster: MeshRaster::new(device, &base.mesh_layout, RasterTarget::RendererId, cull_mode),
                count_vertices: gpu::compute_pipeline(
                    device,
                    "tile_based_mesh_count_vertices",
                    &per_vertex,
                    &shader,
                    "count_vertices",
                ),
                count_pixels: gpu::compute_pipeline(device, "tile_based_mesh_count_pixels", &per_pixel, &shader, "count_pixels"),
                colorize: gpu::compute_pipeline(device, "tile_based_mesh_colorize", &per_pixel, &shader, "colorize"),
                group0_layout,
            }
        });
        Self { pipelines: pipelines_or_disabled(Mode::TileBasedMesh, built), base }
    }
}

impl Accumulator for TileBasedMeshAccumulator {
    fn mode(&self) -> Mode {
        Mode::TileBasedMesh
    }

    fn enabled(&self) -> bool {
        self.pipelines.is_some()
    }

    fn prepare_frame(&mut self, ctx: &FrameContext<'_>) -> ProfilerResult<()> {
        self.base.prepare(ctx)?;
        if let Some(p) = self.pipelines.as_mut() {
            p.raster.prepare(ctx.device, self.base.frame_params()?);
        }
        let tiles = ctx.grid.tile_count() as u64;
        let slots = tile_mesh_counter_bytes(ctx.grid.tile_count(), ctx.records.len()) / 4;
        self.base.ensure_counters(ctx.device, TILE_COUNTS, tiles);
        self.base.ensure_counters(ctx.device, TILE_MESH_VERTICES, slots);
        self.base.ensure_counters(ctx.device, TILE_MESH_PIXELS, slots);
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
        self.base.clear_counters(encoder, &[TILE_COUNTS, TILE_MESH_VERTICES, TILE_MESH_PIXELS])?;
        let meshes = self.base.mesh_bindings(ctx);
        let ids = self.base.pool.view(RENDERER_IDS)?;
        p.raster.encode(encoder, ctx, ids, Some(self.base.pool.view(RENDERER_DEPTH)?), &meshes)?;
        let pool = &self.base.pool;
        let group0 = self.base.compute_bind_group(
            ctx.device,
            "tile_based_mesh_bind_group_0",
            &p.group0_layout,
            vec![
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(ids) },
                wgpu::BindGroupEntry { binding: 4, resource: pool.buffer(TILE_COUNTS)?.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: pool.buffer(TILE_MESH_VERTICES)?.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: pool.buffer(TILE_MESH_PIXELS)?.as_entire_binding() },
            ],
        )?;
        let mut pass = begin_compute(encoder, "tile_based_mesh_pass");
        dispatch_per_vertex(&mut pass, &p.count_vertices, &group0, &meshes);
        dispatch_per_pixel(&mut pass, &p.count_pixels, &group0, ctx);
        dispatch_per_pixel(&mut pass, &p.colorize, &group0, ctx);
        Ok(())
    }

    fn readback_sources(&self) -> Vec<CounterSource<'_>> {
        [CounterKind::TileVertices, CounterKind::TileRendererVertices, CounterKind::TileRendererPixels]
            .into_iter()
            .filter_map(|kind| self.base.counter_source(kind))
            .collect()
    }

    fn profiler_view(&self) -> Option<&wgpu::TextureView> {
        self.base.profiler_view()
    }

    fn counter_bytes(&self, grid: &TileGrid, records: usize) -> u64 {
        tile_mesh_counter_bytes(grid.tile_count(), records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::counters_fit;

    #[test]
    fn large_scenes_exceed_default_binding_limit() {
        let limits = wgpu::Limits::default();
        let grid = TileGrid::new(1920, 1080, 32, 32);
        assert_eq!(grid.tile_count(), 60 * 34);
        let crowded = tile_mesh_counter_bytes(grid.tile_count(), 20_000);
        assert_eq!(crowded, 2040 * 20_000 * 4);
        assert!(!counters_fit(crowded, &limits));
        assert!(counters_fit(tile_mesh_counter_bytes(grid.tile_count(), 500), &limits));
        assert_eq!(tile_mesh_counter_bytes(grid.tile_count(), 0), 0);
    }
}
