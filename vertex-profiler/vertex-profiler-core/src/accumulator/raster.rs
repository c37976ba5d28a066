//! Mesh raster stage shared by the mesh modes: renderer-id targets and the overdraw counter.

use crate::accumulator::{FrameContext, MeshBinding};
use crate::config::CullMode;
use crate::error::{ProfilerError, ProfilerResult};
use crate::gpu;

const FRAME_GROUP: &str = "profiler_raster_bind_group_0";

const RASTER_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/raster.wgsl"));

pub const RENDERER_IDS: &str = "renderer_ids";
pub const RENDERER_DEPTH: &str = "renderer_depth";
pub const OVERDRAW_COUNT: &str = "overdraw_count";

pub const RENDERER_ID_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg32Uint;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const OVERDRAW_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RasterTarget {
    /// `(renderer_id + 1, vertex_count)` into Rg32Uint with depth testing.
    RendererId,
    /// +1 per fragment into R16Float, no depth.
    Overdraw,
}

pub struct MeshRaster {
    pipeline: wgpu::RenderPipeline,
    frame_layout: wgpu::BindGroupLayout,
    /// Over the session's frame uniform, which keeps one allocation for the whole session.
    frame_group: Option<wgpu::BindGroup>,
    target: RasterTarget,
}

impl MeshRaster {
    pub fn new(
        device: &wgpu::Device,
        mesh_layout: &wgpu::BindGroupLayout,
        target: RasterTarget,
        cull_mode: CullMode,
    ) -> Self {
        let shader = gpu::create_shader(device, "profiler_raster_shader", &[RASTER_SHADER], false);
        let frame_layout = gpu::frame_bind_group_layout(device);
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("profiler_raster_pipeline_layout"),
            bind_group_layouts: &[&frame_layout, mesh_layout],
            push_constant_ranges: &[],
        });
        let (fs_entry, color_target, depth_stencil) = match target {
            RasterTarget::RendererId => (
                "fs_renderer_id",
                wgpu::ColorTargetState {
                    format: RENDERER_ID_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                },
                Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
            ),
            RasterTarget::Overdraw => (
                "fs_overdraw",
                wgpu::ColorTargetState {
                    format: OVERDRAW_FORMAT,
                    blend: Some(wgpu::BlendState {
                        color: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::One,
                            operation: wgpu::BlendOperation::Add,
                        },
                        alpha: wgpu::BlendComponent::REPLACE,
                    }),
                    write_mask: wgpu::ColorWrites::RED,
                },
                None,
            ),
        };
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(match target {
                RasterTarget::RendererId => "profiler_renderer_id_pipeline",
                RasterTarget::Overdraw => "profiler_overdraw_pipeline",
            }),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some(fs_entry),
                targets: &[Some(color_target)],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                cull_mode: cull_mode.to_wgpu(),
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        Self { pipeline, frame_layout, frame_group: None, target }
    }

    pub fn prepare(&mut self, device: &wgpu::Device, frame_params: &wgpu::Buffer) {
        if self.frame_group.is_some() {
            return;
        }
        self.frame_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(FRAME_GROUP),
            layout: &self.frame_layout,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: frame_params.as_entire_binding() }],
        }));
    }

    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        ctx: &FrameContext<'_>,
        color_view: &wgpu::TextureView,
        depth_view: Option<&wgpu::TextureView>,
        meshes: &[MeshBinding<'_>],
    ) -> ProfilerResult<()> {
        let frame_group = self.frame_group.as_ref().ok_or(ProfilerError::MissingResource(FRAME_GROUP))?;
        let label = match self.target {
            RasterTarget::RendererId => "profiler_renderer_id_pass",
            RasterTarget::Overdraw => "profiler_overdraw_pass",
        };
        let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rp.set_pipeline(&self.pipeline);
        rp.set_viewport(0.0, 0.0, ctx.width() as f32, ctx.height() as f32, 0.0, 1.0);
        rp.set_bind_group(0, frame_group, &[]);
        for mesh in meshes {
            let Some(record) = ctx.records.get(mesh.record) else { continue };
            rp.set_bind_group(1, mesh.bind_group, &[]);
            rp.set_index_buffer(record.mesh.index_buf.slice(..), wgpu::IndexFormat::Uint32);
            rp.draw_indexed(0..record.mesh.index_count, 0, 0..1);
        }
        Ok(())
    }
}
