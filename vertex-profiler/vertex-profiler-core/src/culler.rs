//! Frustum culling of renderer bounds. Parallel over records with rayon, result packed into a bitset.

use bit_vec::BitVec;
use glam::{Mat4, Vec3, Vec4};
use rayon::prelude::*;

/// Axis-aligned box as center + half extents.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Aabb {
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self { center: (min + max) * 0.5, half_extents: (max - min) * 0.5 }
    }

    /// Bounds of tightly packed f32 vertices whose first three floats are the position.
    pub fn from_vertex_floats(floats: &[f32], stride_floats: usize) -> Option<Self> {
        if stride_floats < 3 {
            return None;
        }
        let mut chunks = floats.chunks_exact(stride_floats);
        let first = chunks.next()?;
        let mut min = Vec3::new(first[0], first[1], first[2]);
        let mut max = min;
        for v in chunks {
            let p = Vec3::new(v[0], v[1], v[2]);
            min = min.min(p);
            max = max.max(p);
        }
        Some(Self::from_min_max(min, max))
    }

    /// World bounds: center through the transform, extents through |rotation-scale|.
    pub fn transformed(&self, m: &Mat4) -> Self {
        let center = m.transform_point3(self.center);
        let abs_x = m.x_axis.truncate().abs();
        let abs_y = m.y_axis.truncate().abs();
        let abs_z = m.z_axis.truncate().abs();
        let e = self.half_extents;
        Self { center, half_extents: abs_x * e.x + abs_y * e.y + abs_z * e.z }
    }
}

/// Six planes `(n, d)` with inward normals: left, right, bottom, top, near, far.
pub type Frustum = [Vec4; 6];

/// Gribb-Hartmann extraction for a 0..1 depth range.
pub fn frustum_planes(view_proj: &Mat4) -> Frustum {
    let r0 = view_proj.row(0);
    let r1 = view_proj.row(1);
    let r2 = view_proj.row(2);
    let r3 = view_proj.row(3);
    [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2]
}

pub fn aabb_outside_plane(aabb: &Aabb, plane: Vec4) -> bool {
    let n = plane.truncate();
    n.dot(aabb.center) + plane.w + n.abs().dot(aabb.half_extents) < 0.0
}

pub fn aabb_in_frustum(aabb: &Aabb, planes: &Frustum) -> bool {
    !planes.iter().any(|&p| aabb_outside_plane(aabb, p))
}

/// One visibility bit per renderer record, index-aligned with the record list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisibilitySet {
    bits: BitVec,
}

impl VisibilitySet {
    pub fn all_visible(len: usize) -> Self {
        Self { bits: BitVec::from_elem(len, true) }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn is_visible(&self, index: usize) -> bool {
        self.bits.get(index).unwrap_or(false)
    }

    pub fn visible_count(&self) -> usize {
        self.bits.iter().filter(|b| *b).count()
    }

    pub fn iter_visible(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().filter(|(_, b)| *b).map(|(i, _)| i)
    }
}

impl FromIterator<bool> for VisibilitySet {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        Self { bits: iter.into_iter().collect() }
    }
}

/// Test every box against the frustum in parallel; joins before returning.
pub fn cull_bounds(bounds: &[Aabb], planes: &Frustum) -> VisibilitySet {
    let flags: Vec<bool> = bounds.par_iter().map(|b| aabb_in_frustum(b, planes)).collect();
    flags.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Mat4 {
        let proj = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        proj * view
    }

    fn unit_box(at: Vec3) -> Aabb {
        Aabb { center: at, half_extents: Vec3::splat(0.5) }
    }

    #[test]
    fn box_in_front_of_camera_is_visible() {
        let planes = frustum_planes(&camera());
        assert!(aabb_in_frustum(&unit_box(Vec3::ZERO), &planes));
    }

    #[test]
    fn boxes_outside_are_culled() {
        let planes = frustum_planes(&camera());
        // behind the camera
        assert!(!aabb_in_frustum(&unit_box(Vec3::new(0.0, 0.0, 10.0)), &planes));
        // past the far plane
        assert!(!aabb_in_frustum(&unit_box(Vec3::new(0.0, 0.0, -200.0)), &planes));
        // far off to the side
        assert!(!aabb_in_frustum(&unit_box(Vec3::new(50.0, 0.0, 0.0)), &planes));
        assert!(!aabb_in_frustum(&unit_box(Vec3::new(0.0, -50.0, 0.0)), &planes));
    }

    #[test]
    fn straddling_box_is_visible() {
        let planes = frustum_planes(&camera());
        let big = Aabb { center: Vec3::new(0.0, 0.0, 5.0), half_extents: Vec3::splat(3.0) };
        assert!(aabb_in_frustum(&big, &planes));
    }

    #[test]
    fn cull_keeps_index_alignment() {
        let planes = frustum_planes(&camera());
        let bounds = vec![
            unit_box(Vec3::ZERO),
            unit_box(Vec3::new(0.0, 0.0, 10.0)),
            unit_box(Vec3::new(1.0, 0.5, -3.0)),
            unit_box(Vec3::new(500.0, 0.0, 0.0)),
        ];
        let vis = cull_bounds(&bounds, &planes);
        assert_eq!(vis.len(), 4);
        assert_eq!(vis.iter_visible().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(vis.visible_count(), 2);
        assert!(!vis.is_visible(17));
    }

    #[test]
    fn transformed_bounds_follow_rotation_and_scale() {
        let local = Aabb::from_min_max(Vec3::new(-1.0, -2.0, -3.0), Vec3::new(1.0, 2.0, 3.0));
        let m = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0))
            * Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2)
            * Mat4::from_scale(Vec3::splat(2.0));
        let world = local.transformed(&m);
        assert!((world.center - Vec3::new(10.0, 0.0, 0.0)).length() < 1e-5);
        assert!((world.half_extents - Vec3::new(4.0, 2.0, 6.0)).length() < 1e-4);
    }

    #[test]
    fn bounds_from_interleaved_vertices() {
        let floats = [
            -1.0, 0.0, 2.0, 9.0, 9.0, //
            3.0, -4.0, 0.0, 9.0, 9.0,
        ];
        let aabb = Aabb::from_vertex_floats(&floats, 5).unwrap();
        assert_eq!(aabb.center, Vec3::new(1.0, -2.0, 1.0));
        assert_eq!(aabb.half_extents, Vec3::new(2.0, 2.0, 1.0));
        assert!(Aabb::from_vertex_floats(&[], 3).is_none());
    }
}
