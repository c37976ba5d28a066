//! Overdraw: additive fragment count without depth, classified on the raw count.

use crate::accumulator::raster::{MeshRaster, RasterTarget, OVERDRAW_COUNT, OVERDRAW_FORMAT};
use crate::accumulator::{
    begin_compute, dispatch_per_pixel, pipelines_or_disabled, Accumulator, AccumulatorBase, FrameContext,
};
use crate::config::{CullMode, Mode};
use crate::error::ProfilerResult;
use crate::gpu;

const OVERDRAW_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/overdraw.wgsl"));

struct Pipelines {
    raster: MeshRaster,
    group0_layout: wgpu::BindGroupLayout,
    colorize: wgpu::ComputePipeline,
}

pub struct OverdrawAccumulator {
    base: AccumulatorBase,
    pipelines: Option<Pipelines>,
}

impl OverdrawAccumulator {
    pub fn new(device: &wgpu::Device, cull_mode: CullMode) -> Self {
        let base = AccumulatorBase::new(device);
        let built = gpu::validated(device, || {
            let group0_layout = base.compute_layout(
                device,
                "overdraw_bind_group_layout_0",
                &[gpu::texture_entry(
                    3,
                    wgpu::ShaderStages::COMPUTE,
                    wgpu::TextureSampleType::Float { filterable: false },
                )],
            );
            let (_, per_pixel) = base.pipeline_layouts(device, &group0_layout);
            let shader = gpu::create_shader(device, "overdraw_shader", &[OVERDRAW_SHADER], true);
            Pipelines {
                raster: MeshRaster::new(device, &base.mesh_layout, RasterTarget::Overdraw, cull_mode),
                colorize: gpu::compute_pipeline(device, "overdraw_colorize", &per_pixel, &shader, "colorize"),
                group0_layout,
            }
        });
        Self { pipelines: pipelines_or_disabled(Mode::Overdraw, built), base }
    }
}

impl Accumulator for OverdrawAccumulator {
    fn mode(&self) -> Mode {
        Mode::Overdraw
    }

    fn enabled(&self) -> bool {
        self.pipelines.is_some()
    }

    fn prepare_frame(&mut self, ctx: &FrameContext<'_>) -> ProfilerResult<()> {
        self.base.prepare(ctx)?;
        if let Some(p) = self.pipelines.as_mut() {
            p.raster.prepare(ctx.device, self.base.frame_params()?);
        }
        self.base.ensure_target(
            ctx,
            OVERDRAW_COUNT,
            OVERDRAW_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        Ok(())
    }

    fn accumulate(&self, encoder: &mut wgpu::CommandEncoder, ctx: &FrameContext<'_>) -> ProfilerResult<()> {
        let Some(p) = &self.pipelines else { return Ok(()) };
        let meshes = self.base.mesh_bindings(ctx);
        let counts = self.base.pool.view(OVERDRAW_COUNT)?;
        p.raster.encode(encoder, ctx, counts, None, &meshes)?;
        let group0 = self.base.compute_bind_group(
            ctx.device,
            "overdraw_bind_group_0",
            &p.group0_layout,
            vec![wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(counts) }],
        )?;
        let mut pass = begin_compute(encoder, "overdraw_pass");
        dispatch_per_pixel(&mut pass, &p.colorize, &group0, ctx);
        Ok(())
    }

    fn profiler_view(&self) -> Option<&wgpu::TextureView> {
        self.base.profiler_view()
    }
}
