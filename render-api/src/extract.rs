//! Data types for extraction from the host engine into the render world.
//! The host fills these each frame (or whenever its drawable set changes).

use std::collections::HashMap;

/// Column-major identity matrix.
pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
];

/// Raw geometry of one mesh.
#[derive(Clone, Debug)]
pub struct MeshGeometry {
    /// Mesh asset name, reported as the resource name in mesh samples.
    pub name: String,
    /// Interleaved vertex data. Position must be the first three f32 of each vertex.
    pub vertex_data: Vec<u8>,
    /// Vertex stride in bytes (multiple of 4, at least 12).
    pub vertex_stride: u32,
    /// Index data (u32 indices).
    pub index_data: Vec<u8>,
}

impl MeshGeometry {
    pub fn vertex_count(&self) -> u32 {
        if self.vertex_stride == 0 {
            return 0;
        }
        (self.vertex_data.len() / self.vertex_stride as usize) as u32
    }

    pub fn index_count(&self) -> u32 {
        (self.index_data.len() / 4) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_data.is_empty() || self.index_data.is_empty()
    }
}

/// Per-drawable instance data extracted from the main world.
#[derive(Clone, Debug)]
pub struct ExtractedMesh {
    /// Host-defined entity or instance id.
    pub entity_id: u64,
    /// Full path of the drawable in the host's scene hierarchy ("Root/Child/Leaf").
    pub hierarchy_path: String,
    /// Mesh this drawable renders. `None` when the drawable has no mesh assigned.
    pub mesh: Option<MeshGeometry>,
    /// World transform: column-major 4x4 matrix (WGSL/wgpu convention).
    /// Index [col*4+row]; e.g. m[0..4] is the first column.
    pub transform: [f32; 16],
    /// Whether the drawable is enabled.
    pub enabled: bool,
}

/// All extracted drawables for the current frame.
#[derive(Default, Debug)]
pub struct ExtractedMeshes {
    pub meshes: HashMap<u64, ExtractedMesh>,
}

impl ExtractedMeshes {
    pub fn insert(&mut self, mesh: ExtractedMesh) {
        self.meshes.insert(mesh.entity_id, mesh);
    }
}

/// View/camera data for the current frame.
#[derive(Clone, Debug)]
pub struct ExtractedView {
    pub view_proj: [f32; 16],
    /// Camera pixel size (width, height).
    pub viewport_size: (u32, u32),
    /// World-space camera position.
    pub camera_position: [f32; 3],
}

impl Default for ExtractedView {
    fn default() -> Self {
        Self {
            view_proj: IDENTITY,
            viewport_size: (800, 600),
            camera_position: [0.0, 0.0, 0.0],
        }
    }
}
