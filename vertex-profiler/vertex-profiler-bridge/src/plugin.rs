//! Profiler plugin: implements RenderBackend for the host.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::Mat4;
use render_api::{ExtractedMesh, ExtractedMeshes, ExtractedView, RenderBackend};
use vertex_profiler_core::{
    ExportSink, FrameInput, GpuMesh, Mode, ProfilerConfig, ProfilerControls, SceneDrawable, VertexProfiler,
};

use crate::present::PresentPass;
use crate::scene_pass::{ScenePass, SceneTargets};

/// Uploaded mesh plus the byte sizes it was uploaded with.
struct CachedMesh {
    mesh: Arc<GpuMesh>,
    vertex_len: usize,
    index_len: usize,
}

/// True when the profiled drawable set differs in a way the renderer records depend on.
fn drawables_changed(old: &[SceneDrawable], new: &[SceneDrawable]) -> bool {
    old.len() != new.len()
        || old.iter().zip(new).any(|(a, b)| {
            a.entity_id != b.entity_id
                || a.enabled != b.enabled
                || a.transform != b.transform
                || a.hierarchy_path != b.hierarchy_path
                || match (&a.mesh, &b.mesh) {
                    (Some(x), Some(y)) => !Arc::ptr_eq(x, y),
                    (None, None) => false,
                    _ => true,
                }
        })
}

/// Owns the wgpu device/queue, the base scene pass and the vertex profiler.
pub struct ProfilerPlugin {
    device: wgpu::Device,
    queue: wgpu::Queue,
    profiler: VertexProfiler,
    scene_pass: ScenePass,
    targets: Option<SceneTargets>,
    /// Cache by entity_id. Updated in prepare() from ExtractedMeshes.
    mesh_cache: HashMap<u64, CachedMesh>,
    /// Sorted by entity id.
    drawables: Vec<SceneDrawable>,
}

impl ProfilerPlugin {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Result<Self, String> {
        Self::new_with_config(device, queue, ProfilerConfig::default())
    }

    pub fn new_with_config(device: wgpu::Device, queue: wgpu::Queue, config: ProfilerConfig) -> Result<Self, String> {
        let profiler = VertexProfiler::new(&device, config).map_err(|e| e.to_string())?;
        let scene_pass = ScenePass::new(&device);
        Ok(Self {
            device,
            queue,
            profiler,
            scene_pass,
            targets: None,
            mesh_cache: HashMap::new(),
            drawables: Vec::new(),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
    pub fn profiler(&self) -> &VertexProfiler {
        &self.profiler
    }
    pub fn profiler_mut(&mut self) -> &mut VertexProfiler {
        &mut self.profiler
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.profiler.set_mode(mode);
    }

    pub fn controls_mut(&mut self) -> &mut ProfilerControls {
        self.profiler.controls_mut()
    }

    pub fn set_export_sink(&mut self, sink: impl ExportSink + 'static) {
        self.profiler.set_export_sink(sink);
    }

    pub fn set_config(&mut self, config: ProfilerConfig) -> Result<(), String> {
        self.profiler.set_config(config).map_err(|e| e.to_string())
    }

    /// Scene colour of the last rendered frame.
    pub fn scene_color(&self) -> Option<&wgpu::Texture> {
        self.targets.as_ref().map(|t| &t.color)
    }

    fn upload(&mut self, extracted: &ExtractedMesh) -> Option<Arc<GpuMesh>> {
        let geometry = extracted.mesh.as_ref()?;
        let (vertex_len, index_len) = (geometry.vertex_data.len(), geometry.index_data.len());
        if let Some(cached) = self.mesh_cache.get(&extracted.entity_id) {
            if cached.vertex_len == vertex_len && cached.index_len == index_len && cached.mesh.name == geometry.name {
                self.queue.write_buffer(&cached.mesh.vertex_buf, 0, &geometry.vertex_data);
                self.queue.write_buffer(&cached.mesh.index_buf, 0, &geometry.index_data);
                return Some(Arc::clone(&cached.mesh));
            }
        }
        let Some(mesh) = GpuMesh::upload(&self.device, geometry) else {
            log::debug!("entity {}: mesh `{}` has no usable geometry", extracted.entity_id, geometry.name);
            self.mesh_cache.remove(&extracted.entity_id);
            return None;
        };
        let mesh = Arc::new(mesh);
        self.mesh_cache.insert(
            extracted.entity_id,
            CachedMesh { mesh: Arc::clone(&mesh), vertex_len, index_len },
        );
        Some(mesh)
    }

    /// Render one frame, then blit the composite to `swapchain_view`. Use this when displaying in a window.
    pub fn render_frame_to_swapchain(
        &mut self,
        view: &ExtractedView,
        present: &PresentPass,
        swapchain_view: &wgpu::TextureView,
    ) -> Result<(), String> {
        self.render_frame_impl(view, Some((present, swapchain_view)))
    }

    fn render_frame_impl(
        &mut self,
        view: &ExtractedView,
        swapchain: Option<(&PresentPass, &wgpu::TextureView)>,
    ) -> Result<(), String> {
        let (width, height) = view.viewport_size;
        let targets = SceneTargets::ensure_size(&self.device, self.targets.take(), width, height)?;
        let view_proj = Mat4::from_cols_array(&view.view_proj);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("profiler_plugin_frame"),
        });
        self.scene_pass.encode(&mut encoder, &self.device, &self.queue, &targets, &self.drawables, &view_proj);
        let frame = FrameInput {
            view_proj,
            width,
            height,
            scene_color: &targets.color,
            scene_view: &targets.color_view,
            drawables: &self.drawables,
        };
        let encoded = self.profiler.encode_frame(&self.device, &self.queue, &mut encoder, &frame);
        if let Err(e) = encoded {
            self.profiler.frame_discarded();
            self.targets = Some(targets);
            return Err(e.to_string());
        }
        if let Some((present, output)) = swapchain {
            let Some(composite) = self.profiler.composite_view() else {
                self.profiler.frame_discarded();
                self.targets = Some(targets);
                return Err("profiler composite missing".to_string());
            };
            present.encode(&mut encoder, &self.device, composite, output);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.profiler.frame_submitted();
        self.targets = Some(targets);
        Ok(())
    }
}

impl RenderBackend for ProfilerPlugin {
    fn prepare(&mut self, extracted: &ExtractedMeshes) {
        let current_entities: HashSet<u64> = extracted.meshes.keys().copied().collect();
        self.mesh_cache.retain(|k, _| current_entities.contains(k));

        let mut entities: Vec<&ExtractedMesh> = extracted.meshes.values().collect();
        entities.sort_by_key(|m| m.entity_id);
        let mut drawables = Vec::with_capacity(entities.len());
        for extracted_mesh in entities {
            let mesh = if extracted_mesh.enabled { self.upload(extracted_mesh) } else { None };
            drawables.push(SceneDrawable {
                entity_id: extracted_mesh.entity_id,
                hierarchy_path: extracted_mesh.hierarchy_path.clone(),
                mesh,
                transform: Mat4::from_cols_array(&extracted_mesh.transform),
                enabled: extracted_mesh.enabled,
            });
        }
        if drawables_changed(&self.drawables, &drawables) {
            log::debug!("drawable set changed ({} drawables); recollecting renderers", drawables.len());
            self.profiler.controls_mut().recollect_renderers = true;
        }
        self.drawables = drawables;
    }

    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String> {
        self.render_frame_impl(view, None)
    }

    fn end_of_frame(&mut self) -> Result<(), String> {
        self.profiler.end_of_frame(&self.device, &self.queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drawable(entity_id: u64, x: f32) -> SceneDrawable {
        SceneDrawable {
            entity_id,
            hierarchy_path: format!("Root/E{entity_id}"),
            mesh: None,
            transform: Mat4::from_translation(glam::Vec3::new(x, 0.0, 0.0)),
            enabled: true,
        }
    }

    #[test]
    fn unchanged_drawables_do_not_trigger_recollection() {
        let a = vec![drawable(1, 0.0), drawable(2, 1.0)];
        let b = vec![drawable(1, 0.0), drawable(2, 1.0)];
        assert!(!drawables_changed(&a, &b));
    }

    #[test]
    fn moved_added_or_disabled_drawables_are_changes() {
        let base = vec![drawable(1, 0.0), drawable(2, 1.0)];
        assert!(drawables_changed(&base, &[drawable(1, 0.0), drawable(2, 2.0)]));
        assert!(drawables_changed(&base, &[drawable(1, 0.0)]));
        let mut disabled = vec![drawable(1, 0.0), drawable(2, 1.0)];
        disabled[1].enabled = false;
        assert!(drawables_changed(&base, &disabled));
    }
}
