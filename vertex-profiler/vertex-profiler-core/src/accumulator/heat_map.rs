//! MeshHeatMap: per-pixel vertex splat gated by depth ownership, window merge, ramp colorize.

use crate::accumulator::raster::{MeshRaster, RasterTarget, DEPTH_FORMAT, RENDERER_DEPTH, RENDERER_IDS, RENDERER_ID_FORMAT};
use crate::accumulator::{
    begin_compute, dispatch_per_pixel, dispatch_per_vertex, pipelines_or_disabled, Accumulator, AccumulatorBase,
    FrameContext,
};
use crate::classifier::Color;
use crate::config::{Mode, ProfilerConfig};
use crate::error::ProfilerResult;
use crate::gpu;
use crate::resources::TextureSignature;
use crate::tiles::TileGrid;

const HEAT_MAP_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/heat_map.wgsl"));

const PIXEL_VERTICES: &str = "pixel_vertices";
const HEAT_VALUES: &str = "heat_values";
const HEAT_RAMP: &str = "heat_ramp";

pub const RAMP_WIDTH: u32 = 256;

/// Evenly spaced control points resampled to a `RAMP_WIDTH` x 1 RGBA8 strip.
pub fn bake_ramp(colors: &[Color]) -> Vec<[u8; 4]> {
    let Some(&last) = colors.last() else {
        return vec![[0; 4]; RAMP_WIDTH as usize];
    };
    let segments = colors.len() - 1;
    (0..RAMP_WIDTH)
        .map(|i| {
            if segments == 0 {
                return last.to_rgba8();
            }
            let pos = i as f32 / (RAMP_WIDTH - 1) as f32 * segments as f32;
            let lo = (pos.floor() as usize).min(segments - 1);
            colors[lo].lerp(colors[lo + 1], pos - lo as f32).to_rgba8()
        })
        .collect()
}

struct Pipelines {
    raster: MeshRaster,
    group0_layout: wgpu::BindGroupLayout,
    splat_vertices: wgpu::ComputePipeline,
    merge: wgpu::ComputePipeline,
    colorize: wgpu::ComputePipeline,
}

pub struct MeshHeatMapAccumulator {
    base: AccumulatorBase,
    pipelines: Option<Pipelines>,
    baked_ramp: Option<Vec<Color>>,
}

impl MeshHeatMapAccumulator {
    pub fn new(device: &wgpu::Device, config: &ProfilerConfig) -> Self {
        let base = AccumulatorBase::new(device);
        let built = gpu::validated(device, || {
            let group0_layout = base.compute_layout(
                device,
                "heat_map_bind_group_layout_0",
                &[
                    gpu::texture_entry(3, wgpu::ShaderStages::COMPUTE, wgpu::TextureSampleType::Uint),
                    gpu::storage_entry(4, wgpu::ShaderStages::COMPUTE, false),
                    gpu::storage_entry(5, wgpu::ShaderStages::COMPUTE, false),
                    gpu::texture_entry(
                        6,
                        wgpu::ShaderStages::COMPUTE,
                        wgpu::TextureSampleType::Float { filterable: false },
                    ),
                ],
            );
            let (per_vertex, per_pixel) = base.pipeline_layouts(device, &group0_layout);
            let shader = gpu::create_shader(device, "heat_map_shader", &[HEAT_MAP_SHADER], true);
            Pipelines {
                raster: MeshRaster::new(device, &base.mesh_layout, RasterTarget::RendererId, config.cull_mode),
                splat_vertices: gpu::compute_pipeline(device, "heat_map_splat_vertices", &per_vertex, &shader, "splat_vertices"),
                merge: gpu::compute_pipeline(device, "heat_map_merge", &per_pixel, &shader, "merge"),
                colorize: gpu::compute_pipeline(device, "heat_map_colorize", &per_pixel, &shader, "colorize"),
                group0_layout,
            }
        });
        Self { pipelines: pipelines_or_disabled(Mode::MeshHeatMap, built), base, baked_ramp: None }
    }

    fn upload_ramp(&mut self, ctx: &FrameContext<'_>) -> ProfilerResult<()> {
        let reallocated = self.base.pool.ensure_texture(
            ctx.device,
            HEAT_RAMP,
            TextureSignature {
                width: RAMP_WIDTH,
                height: 1,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            },
        );
        let colors = &ctx.config.heat_map.ramp;
        if !reallocated && self.baked_ramp.as_ref() == Some(colors) {
            return Ok(());
        }
        let texels = bake_ramp(colors);
        let ramp = self.base.pool.texture(HEAT_RAMP)?;
        ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &ramp.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&texels),
            wgpu::ImageDataLayout { offset: 0, bytes_per_row: Some(RAMP_WIDTH * 4), rows_per_image: Some(1) },
            ramp.signature.extent(),
        );
        self.baked_ramp = Some(colors.clone());
        log::debug!("heat map ramp baked from {} colours", colors.len());
        Ok(())
    }
}

impl Accumulator for MeshHeatMapAccumulator {
    fn mode(&self) -> Mode {
        Mode::MeshHeatMap
    }

    fn enabled(&self) -> bool {
        self.pipelines.is_some()
    }

    fn prepare_frame(&mut self, ctx: &FrameContext<'_>) -> ProfilerResult<()> {
        self.base.prepare(ctx)?;
        if let Some(p) = self.pipelines.as_mut() {
            p.raster.prepare(ctx.device, self.base.frame_params()?);
        }
        let pixels = ctx.width() as u64 * ctx.height() as u64;
        self.base.ensure_counters(ctx.device, PIXEL_VERTICES, pixels);
        self.base.ensure_counters(ctx.device, HEAT_VALUES, pixels * 2);
        self.base.ensure_target(
            ctx,
            RENDERER_IDS,
            RENDERER_ID_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        self.base.ensure_target(ctx, RENDERER_DEPTH, DEPTH_FORMAT, wgpu::TextureUsages::RENDER_ATTACHMENT);
        self.upload_ramp(ctx)
    }

    fn accumulate(&self, encoder: &mut wgpu::CommandEncoder, ctx: &FrameContext<'_>) -> ProfilerResult<()> {
        let Some(p) = &self.pipelines else { return Ok(()) };
        self.base.clear_counters(encoder, &[PIXEL_VERTICES])?;
        let meshes = self.base.mesh_bindings(ctx);
        let pool = &self.base.pool;
        let ids = pool.view(RENDERER_IDS)?;
        p.raster.encode(encoder, ctx, ids, Some(pool.view(RENDERER_DEPTH)?), &meshes)?;
        let group0 = self.base.compute_bind_group(
            ctx.device,
            "heat_map_bind_group_0",
            &p.group0_layout,
            vec![
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(ids) },
                wgpu::BindGroupEntry { binding: 4, resource: pool.buffer(PIXEL_VERTICES)?.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: pool.buffer(HEAT_VALUES)?.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::TextureView(pool.view(HEAT_RAMP)?),
                },
            ],
        )?;
        let mut pass = begin_compute(encoder, "heat_map_pass");
        dispatch_per_vertex(&mut pass, &p.splat_vertices, &group0, &meshes);
        dispatch_per_pixel(&mut pass, &p.merge, &group0, ctx);
        dispatch_per_pixel(&mut pass, &p.colorize, &group0, ctx);
        Ok(())
    }

    fn profiler_view(&self) -> Option<&wgpu::TextureView> {
        self.base.profiler_view()
    }

    fn counter_bytes(&self, grid: &TileGrid, _records: usize) -> u64 {
        // heat_values: two u32 per pixel
        u64::from(grid.screen_width) * u64::from(grid.screen_height) * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_endpoints_match_control_points() {
        let ramp = bake_ramp(&[Color::rgb(0.0, 0.0, 1.0), Color::rgb(1.0, 0.0, 0.0)]);
        assert_eq!(ramp.len(), RAMP_WIDTH as usize);
        assert_eq!(ramp[0], [0, 0, 255, 255]);
        assert_eq!(ramp[255], [255, 0, 0, 255]);
        let mid = ramp[128];
        assert!(mid[0] > 120 && mid[0] < 135);
    }

    #[test]
    fn single_colour_ramp_is_flat() {
        let ramp = bake_ramp(&[Color::rgb(0.0, 1.0, 0.0)]);
        assert!(ramp.iter().all(|t| *t == [0, 255, 0, 255]));
        assert!(bake_ramp(&[]).iter().all(|t| *t == [0; 4]));
    }

    #[test]
    fn ramp_passes_through_inner_control_points() {
        let ramp = bake_ramp(&[Color::rgb(0.0, 0.0, 0.0), Color::rgb(1.0, 1.0, 1.0), Color::rgb(0.0, 0.0, 0.0)]);
        assert!(ramp[127][0] >= 250 || ramp[128][0] >= 250);
        assert_eq!(ramp[0][0], 0);
        assert_eq!(ramp[255][0], 0);
    }
}
