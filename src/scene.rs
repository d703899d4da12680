//! A scene: the camera through which it's rendered, its meshes, and
//! ambient/background color. Lights live on the pipeline, not here,
//! since their shadow-map storage is preallocated per light.

use crate::camera::Camera;
use crate::color::Rgba8;
use crate::math::Vec3;
use crate::mesh::Mesh;

pub struct Scene {
    pub camera: Camera,
    pub meshes: Vec<Mesh>,
    pub background_rgba: Rgba8,
    pub ambient_rgb: Vec3,
}

impl Scene {
    pub fn new(camera: Camera) -> Scene {
        Scene { camera, meshes: Vec::new(), background_rgba: Rgba8::BLACK, ambient_rgb: Vec3::zeros() }
    }

    pub fn add_mesh(&mut self, mesh: Mesh) {
        self.meshes.push(mesh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_scene_has_no_meshes() {
        let camera = Camera::new(64, 64, 60.0, 0.1, 100.0).unwrap();
        let scene = Scene::new(camera);
        assert!(scene.meshes.is_empty());
    }
}
