//! Renderer collection: turns the host's drawables into a stable, index-addressed record list
//! and uploads one 256-byte parameter block per record.

use std::sync::Arc;

use glam::Mat4;
use render_api::MeshGeometry;
use wgpu::util::DeviceExt;

use crate::culler::Aabb;
use crate::error::ProfilerResult;
use crate::gpu::{GpuRendererParams, RENDERER_PARAMS_SIZE};
use crate::resources::{BufferSignature, ResourcePool};

pub const RENDERER_PARAMS_BUFFER: &str = "renderer_params";

/// What the collector and later stages need to know about a mesh.
pub trait MeshHandle: Send + Sync {
    fn name(&self) -> &str;
    fn vertex_count(&self) -> u32;
    /// Stride in bytes.
    fn vertex_stride(&self) -> u32;
    fn local_bounds(&self) -> Aabb;
}

/// Mesh uploaded for profiling. The vertex buffer is also bound as a storage
/// buffer so compute stages can pull positions with any stride.
pub struct GpuMesh {
    pub name: String,
    pub vertex_buf: wgpu::Buffer,
    pub index_buf: wgpu::Buffer,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub index_count: u32,
    pub local_bounds: Aabb,
}

impl GpuMesh {
    /// `None` for empty geometry or a stride that cannot hold a position.
    pub fn upload(device: &wgpu::Device, geometry: &MeshGeometry) -> Option<Self> {
        if geometry.is_empty() || geometry.vertex_stride < 12 || geometry.vertex_stride % 4 != 0 {
            return None;
        }
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&geometry.vertex_data);
        let local_bounds = Aabb::from_vertex_floats(&floats, (geometry.vertex_stride / 4) as usize)?;
        let vertex_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("profiler_mesh_vertices"),
            contents: &geometry.vertex_data,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });
        let index_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("profiler_mesh_indices"),
            contents: &geometry.index_data,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
        });
        Some(Self {
            name: geometry.name.clone(),
            vertex_buf,
            index_buf,
            vertex_count: geometry.vertex_count(),
            vertex_stride: geometry.vertex_stride,
            index_count: geometry.index_count(),
            local_bounds,
        })
    }
}

impl MeshHandle for GpuMesh {
    fn name(&self) -> &str {
        &self.name
    }
    fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
    fn vertex_stride(&self) -> u32 {
        self.vertex_stride
    }
    fn local_bounds(&self) -> Aabb {
        self.local_bounds
    }
}

/// A host drawable as handed to the collector.
pub struct SceneDrawable<M = GpuMesh> {
    pub entity_id: u64,
    pub hierarchy_path: String,
    pub mesh: Option<Arc<M>>,
    pub transform: Mat4,
    pub enabled: bool,
}

/// One profiled renderer. `id` is its position in the record list.
pub struct RendererRecord<M = GpuMesh> {
    pub id: u32,
    pub entity_id: u64,
    pub resource_name: String,
    pub hierarchy_path: String,
    pub mesh: Arc<M>,
    pub world_bounds: Aabb,
    pub transform: Mat4,
    pub enabled: bool,
}

/// GPU-free view of a record, kept by readback requests.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordSummary {
    pub id: u32,
    pub resource_name: String,
    pub hierarchy_path: String,
    pub vertex_count: u32,
}

impl<M: MeshHandle> RendererRecord<M> {
    pub fn vertex_count(&self) -> u32 {
        self.mesh.vertex_count()
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id,
            resource_name: self.resource_name.clone(),
            hierarchy_path: self.hierarchy_path.clone(),
            vertex_count: self.vertex_count(),
        }
    }

    pub fn gpu_params(&self) -> GpuRendererParams {
        GpuRendererParams {
            model: self.transform.to_cols_array(),
            info: [self.id, self.vertex_count(), self.mesh.vertex_stride() / 4, 0],
            _pad: [[0; 4]; 11],
        }
    }
}

/// Build records in ascending entity id order, skipping disabled and mesh-less drawables.
pub fn collect_records<M: MeshHandle>(drawables: &[SceneDrawable<M>]) -> Vec<RendererRecord<M>> {
    let mut sorted: Vec<&SceneDrawable<M>> = drawables.iter().collect();
    sorted.sort_by_key(|d| d.entity_id);
    sorted
        .into_iter()
        .filter(|d| d.enabled)
        .filter_map(|d| {
            let mesh = d.mesh.as_ref().filter(|m| m.vertex_count() > 0)?;
            Some((d, Arc::clone(mesh)))
        })
        .enumerate()
        .map(|(i, (d, mesh))| RendererRecord {
            id: i as u32,
            entity_id: d.entity_id,
            resource_name: mesh.name().to_string(),
            hierarchy_path: d.hierarchy_path.clone(),
            world_bounds: mesh.local_bounds().transformed(&d.transform),
            mesh,
            transform: d.transform,
            enabled: true,
        })
        .collect()
}

/// Session-scoped renderer list plus its GPU parameter blocks.
#[derive(Default)]
pub struct RendererCollector {
    records: Vec<RendererRecord>,
    generation: u64,
    uploaded_generation: Option<u64>,
}

impl RendererCollector {
    pub fn collect(&mut self, drawables: &[SceneDrawable]) {
        self.records = collect_records(drawables);
        self.generation += 1;
        log::info!(
            "collected {} renderers from {} drawables",
            self.records.len(),
            drawables.len()
        );
    }

    pub fn records(&self) -> &[RendererRecord] {
        &self.records
    }

    pub fn summaries(&self) -> Vec<RecordSummary> {
        self.records.iter().map(RendererRecord::summary).collect()
    }

    /// Changes whenever the records or their parameter buffer change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Write the parameter blocks for the current records if they changed since the last upload.
    pub fn upload_params(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, pool: &mut ResourcePool) -> ProfilerResult<()> {
        let signature = BufferSignature {
            size: RENDERER_PARAMS_SIZE * self.records.len().max(1) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        };
        if pool.ensure_buffer(device, RENDERER_PARAMS_BUFFER, signature) {
            // bind groups over the old buffer are stale
            self.generation += 1;
        } else if self.uploaded_generation == Some(self.generation) {
            return Ok(());
        }
        let params: Vec<GpuRendererParams> = self.records.iter().map(RendererRecord::gpu_params).collect();
        if !params.is_empty() {
            queue.write_buffer(pool.buffer(RENDERER_PARAMS_BUFFER)?, 0, bytemuck::cast_slice(&params));
        }
        self.uploaded_generation = Some(self.generation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    struct TestMesh {
        name: &'static str,
        vertices: u32,
    }

    impl MeshHandle for TestMesh {
        fn name(&self) -> &str {
            self.name
        }
        fn vertex_count(&self) -> u32 {
            self.vertices
        }
        fn vertex_stride(&self) -> u32 {
            32
        }
        fn local_bounds(&self) -> Aabb {
            Aabb { center: Vec3::ZERO, half_extents: Vec3::ONE }
        }
    }

    fn drawable(entity_id: u64, mesh: Option<TestMesh>, enabled: bool) -> SceneDrawable<TestMesh> {
        SceneDrawable {
            entity_id,
            hierarchy_path: format!("Scene/Node{entity_id}"),
            mesh: mesh.map(Arc::new),
            transform: Mat4::from_translation(Vec3::new(entity_id as f32, 0.0, 0.0)),
            enabled,
        }
    }

    #[test]
    fn records_are_ordered_by_entity_and_densely_indexed() {
        let drawables = vec![
            drawable(30, Some(TestMesh { name: "c", vertices: 3 }), true),
            drawable(10, Some(TestMesh { name: "a", vertices: 1 }), true),
            drawable(20, Some(TestMesh { name: "b", vertices: 2 }), true),
        ];
        let records = collect_records(&drawables);
        let ids: Vec<(u32, u64, &str)> = records.iter().map(|r| (r.id, r.entity_id, r.resource_name.as_str())).collect();
        assert_eq!(ids, vec![(0, 10, "a"), (1, 20, "b"), (2, 30, "c")]);
    }

    #[test]
    fn disabled_missing_and_empty_meshes_are_skipped() {
        let drawables = vec![
            drawable(1, Some(TestMesh { name: "kept", vertices: 4 }), true),
            drawable(2, Some(TestMesh { name: "off", vertices: 4 }), false),
            drawable(3, None, true),
            drawable(4, Some(TestMesh { name: "empty", vertices: 0 }), true),
            drawable(5, Some(TestMesh { name: "kept2", vertices: 8 }), true),
        ];
        let records = collect_records(&drawables);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].entity_id, 5);
        assert_eq!(records[1].id, 1);
        assert!(records.iter().all(|r| r.enabled));
    }

    #[test]
    fn world_bounds_follow_transform() {
        let records = collect_records(&[drawable(7, Some(TestMesh { name: "m", vertices: 3 }), true)]);
        assert_eq!(records[0].world_bounds.center, Vec3::new(7.0, 0.0, 0.0));
        assert_eq!(records[0].world_bounds.half_extents, Vec3::ONE);
    }

    #[test]
    fn params_block_carries_id_and_counts() {
        let records = collect_records(&[
            drawable(1, Some(TestMesh { name: "a", vertices: 10 }), true),
            drawable(2, Some(TestMesh { name: "b", vertices: 20 }), true),
        ]);
        let params = records[1].gpu_params();
        assert_eq!(params.info, [1, 20, 8, 0]);
        assert_eq!(params.model[12], 2.0);
        assert_eq!(std::mem::size_of::<GpuRendererParams>() as u64, RENDERER_PARAMS_SIZE);
        assert_eq!(records[1].summary().hierarchy_path, "Scene/Node2");
    }

    #[test]
    fn recollection_moves_the_generation() {
        let mut collector = RendererCollector::default();
        let start = collector.generation();
        collector.collect(&[]);
        collector.collect(&[]);
        assert_eq!(collector.generation(), start + 2);
        assert!(collector.records().is_empty());
    }
}
