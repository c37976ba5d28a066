//! Base scene pass: draws the extracted meshes into the scene colour target the profiler reads.

use glam::Mat4;
use vertex_profiler_core::SceneDrawable;

const SCENE_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/scene.wgsl"));

pub const SCENE_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const SCENE_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// One uniform slot per draw; 256 keeps every offset aligned.
const DRAW_SLOT: u64 = 256;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct DrawParams {
    model: [[f32; 4]; 4],
    color: [f32; 4],
    info: [u32; 4],
}

/// Stable per-entity tint so neighbouring meshes are told apart.
pub fn entity_color(entity_id: u64) -> [f32; 4] {
    let h = entity_id.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let channel = |shift: u32| 0.35 + 0.6 * ((h >> shift) & 0xff) as f32 / 255.0;
    [channel(8), channel(24), channel(40), 1.0]
}

/// Scene colour + depth. Colour is sampled by the overlay and copied for screenshots.
pub struct SceneTargets {
    pub color: wgpu::Texture,
    pub color_view: wgpu::TextureView,
    pub depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl SceneTargets {
    pub fn ensure_size(device: &wgpu::Device, existing: Option<Self>, width: u32, height: u32) -> Result<Self, String> {
        if width == 0 || height == 0 {
            return Err("SceneTargets: width and height must be > 0".to_string());
        }
        if let Some(t) = existing {
            if t.width == width && t.height == height {
                return Ok(t);
            }
        }
        log::debug!("scene targets resized to {}x{}", width, height);
        let make = |label: &str, format: wgpu::TextureFormat, usage: wgpu::TextureUsages| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };
        let color = make(
            "scene_color",
            SCENE_COLOR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
        );
        let depth = make("scene_depth", SCENE_DEPTH_FORMAT, wgpu::TextureUsages::RENDER_ATTACHMENT);
        Ok(Self {
            color_view: color.create_view(&Default::default()),
            depth_view: depth.create_view(&Default::default()),
            color,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Grows the per-draw uniform buffer to hold `draws` slots.
fn ensure_draw_buf<'a>(slot: &'a mut Option<wgpu::Buffer>, device: &wgpu::Device, draws: usize) -> &'a wgpu::Buffer {
    let size = DRAW_SLOT * draws.max(1) as u64;
    if slot.as_ref().is_some_and(|b| b.size() < size) {
        *slot = None;
    }
    slot.get_or_insert_with(|| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("scene_draw_params"),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    })
}

pub struct ScenePass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout_0: wgpu::BindGroupLayout,
    bind_group_layout_1: wgpu::BindGroupLayout,
    view_proj_buf: wgpu::Buffer,
    draw_buf: Option<wgpu::Buffer>,
}

impl ScenePass {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("scene_shader"),
            source: wgpu::ShaderSource::Wgsl(SCENE_SHADER.into()),
        });
        let uniform = |binding: u32, size: u64| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: std::num::NonZeroU64::new(size),
            },
            count: None,
        };
        let bind_group_layout_0 = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scene_bind_group_layout_0"),
            entries: &[uniform(0, 64)],
        });
        let bind_group_layout_1 = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scene_bind_group_layout_1"),
            entries: &[
                uniform(0, std::mem::size_of::<DrawParams>() as u64),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scene_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout_0, &bind_group_layout_1],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("scene_pipeline"),
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
                targets: &[Some(SCENE_COLOR_FORMAT.into())],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: Some(wgpu::DepthStencilState {
                format: SCENE_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let view_proj_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("scene_view_proj"),
            size: 64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { pipeline, bind_group_layout_0, bind_group_layout_1, view_proj_buf, draw_buf: None }
    }

    pub fn encode(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        targets: &SceneTargets,
        drawables: &[SceneDrawable],
        view_proj: &Mat4,
    ) {
        queue.write_buffer(&self.view_proj_buf, 0, bytemuck::cast_slice(&view_proj.to_cols_array()));
        let visible: Vec<&SceneDrawable> = drawables.iter().filter(|d| d.enabled && d.mesh.is_some()).collect();

        let draw_buf = ensure_draw_buf(&mut self.draw_buf, device, visible.len());
        let mut bind_groups = Vec::with_capacity(visible.len());
        for (slot, drawable) in visible.iter().enumerate() {
            let Some(mesh) = drawable.mesh.as_ref() else { continue };
            let params = DrawParams {
                model: drawable.transform.to_cols_array_2d(),
                color: entity_color(drawable.entity_id),
                info: [mesh.vertex_stride / 4, 0, 0, 0],
            };
            let offset = slot as u64 * DRAW_SLOT;
            queue.write_buffer(draw_buf, offset, bytemuck::bytes_of(&params));
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("scene_bind_group_1"),
                layout: &self.bind_group_layout_1,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: draw_buf,
                            offset,
                            size: std::num::NonZeroU64::new(std::mem::size_of::<DrawParams>() as u64),
                        }),
                    },
                    wgpu::BindGroupEntry { binding: 1, resource: mesh.vertex_buf.as_entire_binding() },
                ],
            });
            bind_groups.push((bind_group, mesh));
        }
        let bind_group_0 = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scene_bind_group_0"),
            layout: &self.bind_group_layout_0,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: self.view_proj_buf.as_entire_binding() }],
        });

        let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("scene_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &targets.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r: 0.08, g: 0.08, b: 0.1, a: 1.0 }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &targets.depth_view,
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
        rp.set_bind_group(0, &bind_group_0, &[]);
        for (bind_group, mesh) in &bind_groups {
            rp.set_bind_group(1, bind_group, &[]);
            rp.set_index_buffer(mesh.index_buf.slice(..), wgpu::IndexFormat::Uint32);
            rp.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_params_fit_one_slot() {
        assert!(std::mem::size_of::<DrawParams>() as u64 <= DRAW_SLOT);
        assert_eq!(std::mem::size_of::<DrawParams>() % 16, 0);
    }

    #[test]
    fn entity_colors_are_stable_and_opaque() {
        assert_eq!(entity_color(7), entity_color(7));
        assert_ne!(entity_color(1), entity_color(2));
        let c = entity_color(42);
        assert_eq!(c[3], 1.0);
        assert!(c[..3].iter().all(|v| (0.35..=0.95).contains(v)));
    }
}
