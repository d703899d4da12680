//! Mesh geometry: an immutable vertex/index buffer plus a mutable
//! world transform, an optional texture, and derived bounds.

use std::sync::Arc;

use crate::geometry::MeshVertex;
use crate::math::{Mat4, Quat, Vec3, Vec4};
use crate::texture::Texture;

/// Axis-aligned bounding box. `None`-able emptiness is represented by
/// `min > max` on construction from zero vertices, which callers are
/// expected to treat as "no geometry" rather than dereference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    fn from_points<'a>(points: impl Iterator<Item = &'a Vec3>) -> Aabb {
        let mut min = Vec3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY);
        let mut max = Vec3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY);

        for p in points {
            min = min.zip_map(p, f32::min);
            max = max.zip_map(p, f32::max);
        }

        Aabb { min, max }
    }

    fn transformed(&self, model: &Mat4) -> Aabb {
        let corners = [
            Vec3::new(self.min.x, self.min.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.max.z),
        ];

        let world_points: Vec<Vec3> = corners
            .iter()
            .map(|c| (model * Vec4::new(c.x, c.y, c.z, 1.0)).xyz())
            .collect();

        Aabb::from_points(world_points.iter())
    }
}

/// Translation + rotation + non-uniform scale, composed as `T * R * S`.
#[derive(Debug, Clone, Copy)]
pub struct MeshTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for MeshTransform {
    fn default() -> Self {
        MeshTransform { position: Vec3::zeros(), rotation: Quat::identity(), scale: Vec3::new(1.0, 1.0, 1.0) }
    }
}

impl MeshTransform {
    fn model_matrix(&self) -> Mat4 {
        let translation = Mat4::new_translation(&self.position);
        let rotation = self.rotation.to_homogeneous();
        let scale = Mat4::new_nonuniform_scaling(&self.scale);
        translation * rotation * scale
    }
}

/// Indexed triangle geometry with a world transform and optional texture.
pub struct Mesh {
    vertices: Vec<MeshVertex>,
    /// Flattened triangle index triples; `indices.len()` is always a multiple of 3.
    indices: Vec<u32>,
    pub texture: Option<Arc<Texture>>,
    transform: MeshTransform,
    local_aabb: Aabb,
    model_cache: Option<Mat4>,
    world_aabb_cache: Option<Aabb>,
    is_opaque: bool,
}

impl Mesh {
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Mesh {
        assert_eq!(indices.len() % 3, 0, "mesh indices must come in triangle triples");

        let local_aabb = Aabb::from_points(vertices.iter().map(|v| &v.position));
        let is_opaque = vertices.iter().all(|v| v.color.w >= 1.0);

        Mesh {
            vertices,
            indices,
            texture: None,
            transform: MeshTransform::default(),
            local_aabb,
            model_cache: None,
            world_aabb_cache: None,
            is_opaque,
        }
    }

    /// Append a single triangle (three new vertices, no index sharing).
    /// Invalidates the cached local AABB.
    pub fn add_triangle(&mut self, a: MeshVertex, b: MeshVertex, c: MeshVertex) {
        let base = self.vertices.len() as u32;
        self.vertices.push(a);
        self.vertices.push(b);
        self.vertices.push(c);
        self.indices.push(base);
        self.indices.push(base + 1);
        self.indices.push(base + 2);

        self.local_aabb = Aabb::from_points(self.vertices.iter().map(|v| &v.position));
        self.world_aabb_cache = None;
        self.is_opaque = self.is_opaque && a.color.w >= 1.0 && b.color.w >= 1.0 && c.color.w >= 1.0;
    }

    pub fn set_texture(&mut self, texture: Arc<Texture>) {
        self.is_opaque = texture.is_opaque;
        self.texture = Some(texture);
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.transform.position = position;
        self.invalidate();
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.transform.rotation = rotation;
        self.invalidate();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.transform.scale = scale;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.model_cache = None;
        self.world_aabb_cache = None;
    }

    pub fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    pub fn triangle_indices(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.indices.chunks_exact(3).map(|c| [c[0], c[1], c[2]])
    }

    /// `is_opaque`: true iff the bound texture is opaque (when textured),
    /// otherwise true iff every vertex color has alpha exactly 1.0 (every
    /// channel at full 255), matching `Texture`'s own `a == 255` rule.
    pub fn is_opaque(&self) -> bool {
        self.is_opaque
    }

    pub fn model_matrix(&mut self) -> Mat4 {
        if let Some(m) = self.model_cache {
            return m;
        }
        let m = self.transform.model_matrix();
        self.model_cache = Some(m);
        m
    }

    /// Recompute the model matrix directly, without touching the cache.
    /// Used by the geometry pipeline, which only ever sees `&Mesh`
    /// (meshes live behind `&Scene`); the cache exists for callers that
    /// hold `&mut Mesh` across several queries in the same frame.
    pub fn transform_model_matrix(&self) -> Mat4 {
        self.transform.model_matrix()
    }

    pub fn world_aabb(&mut self) -> Aabb {
        if let Some(aabb) = self.world_aabb_cache {
            return aabb;
        }
        let model = self.model_matrix();
        let aabb = self.local_aabb.transformed(&model);
        self.world_aabb_cache = Some(aabb);
        aabb
    }

    pub fn local_aabb(&self) -> Aabb {
        self.local_aabb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Vec2, Vec4};

    fn vtx(x: f32, y: f32, z: f32, a: f32) -> MeshVertex {
        MeshVertex { position: Vec3::new(x, y, z), normal: Vec3::new(0.0, 0.0, 1.0), uv: Vec2::new(0.0, 0.0), color: Vec4::new(1.0, 1.0, 1.0, a) }
    }

    #[test]
    fn local_aabb_covers_all_vertices() {
        let mesh = Mesh::new(
            vec![vtx(-1.0, -2.0, 0.0, 1.0), vtx(3.0, 4.0, 5.0, 1.0), vtx(0.0, 0.0, -1.0, 1.0)],
            vec![0, 1, 2],
        );
        let aabb = mesh.local_aabb();
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, -1.0));
        assert_eq!(aabb.max, Vec3::new(3.0, 4.0, 5.0));
    }

    #[test]
    fn world_aabb_reflects_translation() {
        let mut mesh = Mesh::new(vec![vtx(0.0, 0.0, 0.0, 1.0), vtx(1.0, 1.0, 1.0, 1.0), vtx(0.0, 1.0, 0.0, 1.0)], vec![0, 1, 2]);
        mesh.set_position(Vec3::new(10.0, 0.0, 0.0));
        let aabb = mesh.world_aabb();
        assert_eq!(aabb.min, Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(11.0, 1.0, 1.0));
    }

    #[test]
    fn translucent_vertex_color_makes_mesh_non_opaque() {
        let mesh = Mesh::new(vec![vtx(0.0, 0.0, 0.0, 1.0), vtx(1.0, 0.0, 0.0, 0.5), vtx(0.0, 1.0, 0.0, 1.0)], vec![0, 1, 2]);
        assert!(!mesh.is_opaque());
    }

    #[test]
    fn add_triangle_extends_geometry_and_aabb() {
        let mut mesh = Mesh::new(Vec::new(), Vec::new());
        mesh.add_triangle(vtx(0.0, 0.0, 0.0, 1.0), vtx(2.0, 0.0, 0.0, 1.0), vtx(0.0, 2.0, 0.0, 1.0));
        assert_eq!(mesh.vertices().len(), 3);
        assert_eq!(mesh.local_aabb().max, Vec3::new(2.0, 2.0, 0.0));
    }
}
