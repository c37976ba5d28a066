//! Shared helpers for the debug hosts: demo scene, OBJ loading, camera, device setup.

use std::path::Path;

use glam::{Mat4, Vec3};
use render_api::{ExtractedMesh, ExtractedMeshes, ExtractedView, MeshGeometry};

/// Vertex layout of generated meshes: position + normal, 6 f32 (24 bytes).
pub const VERTEX_STRIDE: u32 = 24;

fn geometry(name: String, vertices: &[[f32; 6]], indices: &[u32]) -> MeshGeometry {
    MeshGeometry {
        name,
        vertex_data: bytemuck::cast_slice(vertices).to_vec(),
        vertex_stride: VERTEX_STRIDE,
        index_data: bytemuck::cast_slice(indices).to_vec(),
    }
}

/// UV sphere of radius 0.5 with `rings` x `segments` quads.
pub fn uv_sphere(rings: u32, segments: u32) -> MeshGeometry {
    let (rings, segments) = (rings.max(2), segments.max(3));
    let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
    for r in 0..=rings {
        let phi = std::f32::consts::PI * r as f32 / rings as f32;
        for s in 0..=segments {
            let theta = std::f32::consts::TAU * s as f32 / segments as f32;
            let n = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
            let p = n * 0.5;
            vertices.push([p.x, p.y, p.z, n.x, n.y, n.z]);
        }
    }
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);
    let row = segments + 1;
    for r in 0..rings {
        for s in 0..segments {
            let a = r * row + s;
            let b = a + row;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    geometry(format!("sphere_{rings}x{segments}"), &vertices, &indices)
}

/// Unit cube centred at the origin, 24 vertices.
pub fn cube() -> MeshGeometry {
    let faces: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::Y, Vec3::Z),
        (Vec3::NEG_X, Vec3::Y, Vec3::NEG_Z),
        (Vec3::Y, Vec3::Z, Vec3::X),
        (Vec3::NEG_Y, Vec3::NEG_Z, Vec3::X),
        (Vec3::Z, Vec3::Y, Vec3::NEG_X),
        (Vec3::NEG_Z, Vec3::Y, Vec3::X),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, u, v) in faces {
        let base = vertices.len() as u32;
        for (du, dv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let p = n * 0.5 + u * du + v * dv;
            vertices.push([p.x, p.y, p.z, n.x, n.y, n.z]);
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    geometry("cube".to_string(), &vertices, &indices)
}

/// First model of an OBJ file, positions + normals, de-indexed per corner like the loader produces it.
pub fn load_obj(path: &Path) -> Result<MeshGeometry, String> {
    let (models, _) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS).map_err(|e| format!("load_obj: {:?}", e))?;
    let model = models.into_iter().next().ok_or("No mesh in OBJ")?;
    let mesh = model.mesh;
    let n_pos = mesh.positions.len() / 3;
    if n_pos == 0 {
        return Err("OBJ mesh has no positions".to_string());
    }
    let vertices: Vec<[f32; 6]> = (0..n_pos)
        .map(|i| {
            let p = &mesh.positions[i * 3..i * 3 + 3];
            let n = mesh.normals.get(i * 3..i * 3 + 3).unwrap_or(&[0.0, 1.0, 0.0]);
            [p[0], p[1], p[2], n[0], n[1], n[2]]
        })
        .collect();
    let name = if model.name.is_empty() { "obj".to_string() } else { model.name };
    Ok(geometry(name, &vertices, &mesh.indices))
}

/// Row of objects with very different vertex densities: dense and sparse spheres, a cube,
/// a far-away dense sphere, one disabled drawable and one without a mesh.
pub fn demo_scene(extra: Option<MeshGeometry>) -> ExtractedMeshes {
    let mut scene = ExtractedMeshes::default();
    let mut add = |entity_id: u64, name: &str, mesh: Option<MeshGeometry>, at: Vec3, scale: f32, enabled: bool| {
        scene.insert(ExtractedMesh {
            entity_id,
            hierarchy_path: format!("Scene/{name}"),
            mesh,
            transform: Mat4::from_scale_rotation_translation(Vec3::splat(scale), glam::Quat::IDENTITY, at)
                .to_cols_array(),
            enabled,
        });
    };
    add(1, "DenseSphere", Some(uv_sphere(96, 128)), Vec3::new(-1.6, 0.0, 0.0), 1.0, true);
    add(2, "SparseSphere", Some(uv_sphere(8, 12)), Vec3::new(-0.4, 0.0, 0.0), 1.0, true);
    add(3, "Cube", Some(cube()), Vec3::new(0.8, 0.0, 0.0), 0.9, true);
    add(4, "FarDenseSphere", Some(uv_sphere(64, 64)), Vec3::new(2.0, 0.3, -12.0), 1.0, true);
    add(5, "Hidden", Some(uv_sphere(32, 32)), Vec3::new(0.0, 1.5, 0.0), 1.0, false);
    add(6, "EmptyGroup", None, Vec3::ZERO, 1.0, true);
    if let Some(mesh) = extra {
        add(7, "Imported", Some(mesh), Vec3::new(0.0, -1.2, 0.0), 1.0, true);
    }
    scene
}

/// Perspective camera on the +Z axis looking at the origin, wgpu depth range.
pub fn camera_view(width: u32, height: u32, orbit: f32) -> ExtractedView {
    let aspect = if height > 0 { width as f32 / height as f32 } else { 1.0 };
    let eye = Vec3::new(4.0 * orbit.sin(), 0.8, 4.0 * orbit.cos());
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, aspect, 0.1, 100.0);
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
    ExtractedView {
        view_proj: (proj * view).to_cols_array(),
        viewport_size: (width, height),
        camera_position: eye.to_array(),
    }
}

pub async fn request_device() -> Result<(wgpu::Device, wgpu::Queue), String> {
    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .ok_or("No adapter")?;
    adapter
        .request_device(&wgpu::DeviceDescriptor::default(), None)
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_counts() {
        let s = uv_sphere(4, 8);
        assert_eq!(s.vertex_count(), 5 * 9);
        assert_eq!(s.index_count(), 4 * 8 * 6);
        assert_eq!(s.vertex_stride, VERTEX_STRIDE);
    }

    #[test]
    fn cube_counts() {
        let c = cube();
        assert_eq!(c.vertex_count(), 24);
        assert_eq!(c.index_count(), 36);
    }

    #[test]
    fn demo_scene_contains_skippable_drawables() {
        let scene = demo_scene(None);
        assert_eq!(scene.meshes.len(), 6);
        assert!(!scene.meshes[&5].enabled);
        assert!(scene.meshes[&6].mesh.is_none());
    }

    #[test]
    fn camera_uses_viewport_size() {
        let view = camera_view(640, 480, 0.0);
        assert_eq!(view.viewport_size, (640, 480));
        assert_eq!(view.camera_position, [0.0, 0.8, 4.0]);
    }
}
