//! Overlay pass: composites the profiler layer over the scene colour into a pooled texture.
//!
//! Always the last profiler pass of a frame. With no layer (mode `None`, inactive
//! session) the scene is passed through unchanged.

use crate::error::ProfilerResult;
use crate::gpu;
use crate::resources::{ResourcePool, TextureSignature};

const OVERLAY_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/overlay.wgsl"));

pub const COMPOSITE: &str = "profiler_composite";
pub const COMPOSITE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Matches `OverlayParams` in overlay.wgsl.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OverlayParams {
    pub opacity: f32,
    pub show: f32,
    pub _pad: [f32; 2],
}

impl OverlayParams {
    pub fn new(opacity: f32, show: bool) -> Self {
        Self {
            opacity: opacity.clamp(0.0, 1.0),
            show: if show { 1.0 } else { 0.0 },
            _pad: [0.0; 2],
        }
    }
}

pub struct OverlayPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buf: wgpu::Buffer,
    /// Bound in place of the profiler layer when there is none.
    empty_layer: wgpu::TextureView,
}

impl OverlayPass {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("overlay_shader"),
            source: wgpu::ShaderSource::Wgsl(OVERLAY_SHADER.into()),
        });
        let unfiltered = wgpu::TextureSampleType::Float { filterable: false };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("overlay_bind_group_layout"),
            entries: &[
                gpu::texture_entry(0, wgpu::ShaderStages::FRAGMENT, unfiltered),
                gpu::texture_entry(1, wgpu::ShaderStages::FRAGMENT, unfiltered),
                gpu::uniform_entry(2, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<OverlayParams>() as u64),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("overlay_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("overlay_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COMPOSITE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let params_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("overlay_params"),
            size: std::mem::size_of::<OverlayParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let empty_layer = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("overlay_empty_layer"),
                size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: COMPOSITE_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&Default::default());
        Self { pipeline, bind_group_layout, params_buf, empty_layer }
    }

    /// Render `scene` (+ `layer`) into the pooled composite texture sized `width` x `height`.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pool: &mut ResourcePool,
        scene: &wgpu::TextureView,
        layer: Option<&wgpu::TextureView>,
        opacity: f32,
        (width, height): (u32, u32),
    ) -> ProfilerResult<()> {
        pool.ensure_texture(
            device,
            COMPOSITE,
            TextureSignature {
                width,
                height,
                format: COMPOSITE_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
            },
        );
        let params = OverlayParams::new(opacity, layer.is_some());
        queue.write_buffer(&self.params_buf, 0, bytemuck::bytes_of(&params));
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("overlay_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(scene) },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(layer.unwrap_or(&self.empty_layer)),
                },
                wgpu::BindGroupEntry { binding: 2, resource: self.params_buf.as_entire_binding() },
            ],
        });
        let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("overlay_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: pool.view(COMPOSITE)?,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rp.set_pipeline(&self.pipeline);
        rp.set_bind_group(0, &bind_group, &[]);
        rp.draw(0..3, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<OverlayParams>(), 16);
        let p = OverlayParams::new(1.7, true);
        assert_eq!(p.opacity, 1.0);
        assert_eq!(p.show, 1.0);
        assert_eq!(OverlayParams::new(0.5, false).show, 0.0);
    }
}
