//! OnlyTile: per-vertex tile counters, colorized per tile.

use crate::accumulator::{
    begin_compute, dispatch_per_pixel, dispatch_per_vertex, pipelines_or_disabled, Accumulator, AccumulatorBase,
    CounterKind, CounterSource, FrameContext,
};
use crate::config::Mode;
use crate::error::ProfilerResult;
use crate::gpu;
use crate::tiles::TileGrid;

const ONLY_TILE_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/only_tile.wgsl"));

const TILE_COUNTS: &str = "tile_counts";

struct Pipelines {
    group0_layout: wgpu::BindGroupLayout,
    count_vertices: wgpu::ComputePipeline,
    colorize: wgpu::ComputePipeline,
}

pub struct OnlyTileAccumulator {
    base: AccumulatorBase,
    pipelines: Option<Pipelines>,
}

impl OnlyTileAccumulator {
    pub fn new(device: &wgpu::Device) -> Self {
        let base = AccumulatorBase::new(device);
        let built = gpu::validated(device, || {
            let group0_layout = base.compute_layout(
                device,
                "only_tile_bind_group_layout_0",
                &[gpu::storage_entry(3, wgpu::ShaderStages::COMPUTE, false)],
            );
            let (per_vertex, per_pixel) = base.pipeline_layouts(device, &group0_layout);
            let shader = gpu::create_shader(device, "only_tile_shader", &[ONLY_TILE_SHADER], true);
            Pipelines {
                count_vertices: gpu::compute_pipeline(device, "only_tile_count_vertices", &per_vertex, &shader, "count_vertices"),
                colorize: gpu::compute_pipeline(device, "only_tile_colorize", &per_pixel, &shader, "colorize"),
                group0_layout,
            }
        });
        Self { pipelines: pipelines_or_disabled(Mode::OnlyTile, built), base }
    }
}

impl Accumulator for OnlyTileAccumulator {
    fn mode(&self) -> Mode {
        Mode::OnlyTile
    }

    fn enabled(&self) -> bool {
        self.pipelines.is_some()
    }

    fn prepare_frame(&mut self, ctx: &FrameContext<'_>) -> ProfilerResult<()> {
        self.base.prepare(ctx)?;
        self.base.ensure_counters(ctx.device, TILE_COUNTS, ctx.grid.tile_count() as u64);
        Ok(())
    }

    fn accumulate(&self, encoder: &mut wgpu::CommandEncoder, ctx: &FrameContext<'_>) -> ProfilerResult<()> {
        let Some(p) = &self.pipelines else { return Ok(()) };
        self.base.clear_counters(encoder, &[TILE_COUNTS])?;
        let group0 = self.base.compute_bind_group(
            ctx.device,
            "only_tile_bind_group_0",
            &p.group0_layout,
            vec![wgpu::BindGroupEntry { binding: 3, resource: self.base.pool.buffer(TILE_COUNTS)?.as_entire_binding() }],
        )?;
        let meshes = self.base.mesh_bindings(ctx);
        let mut pass = begin_compute(encoder, "only_tile_pass");
        dispatch_per_vertex(&mut pass, &p.count_vertices, &group0, &meshes);
        dispatch_per_pixel(&mut pass, &p.colorize, &group0, ctx);
        Ok(())
    }

    fn readback_sources(&self) -> Vec<CounterSource<'_>> {
        self.base.counter_source(CounterKind::TileVertices).into_iter().collect()
    }

    fn profiler_view(&self) -> Option<&wgpu::TextureView> {
        self.base.profiler_view()
    }

    fn counter_bytes(&self, grid: &TileGrid, _records: usize) -> u64 {
        u64::from(grid.tile_count()) * 4
    }
}
