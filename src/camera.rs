//! Camera: viewport dimensions, projection parameters, and a cached
//! world-to-clip matrix.

use std::cell::Cell;

use crate::error::{PipelineError, PipelineResult};
use crate::math::{perspective_zo, Mat4, Vec3};
use crate::transform::{Perspective, Transform, TransformCell, TransformState};

/// A perspective camera. Looks toward `-Z` in its own local space;
/// world-space forward is `rotation * -Z`.
pub struct Camera {
    transform: TransformCell,
    width: u32,
    height: u32,
    fov_radians: f32,
    near: f32,
    far: f32,
    /// The transform generation the cached matrix was computed against,
    /// alongside the matrix itself. A mismatch against the shared
    /// cell's current generation means either this camera or a linked
    /// partner moved it since, so the cache is stale.
    cached: Cell<Option<(u64, Mat4)>>,
}

impl Camera {
    pub fn new(width: u32, height: u32, fov_degrees: f32, near: f32, far: f32) -> PipelineResult<Camera> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidDimensions { width: width as i64, height: height as i64 });
        }
        if fov_degrees <= 0.0 || fov_degrees >= 360.0 {
            return Err(PipelineError::InvalidFov { fov_deg: fov_degrees });
        }
        if near <= 0.0 {
            return Err(PipelineError::NonPositiveNear { near });
        }
        if near >= far {
            return Err(PipelineError::InvalidNearFar { near, far });
        }

        Ok(Camera {
            transform: TransformCell::new(Default::default()),
            width,
            height,
            fov_radians: fov_degrees.to_radians(),
            near,
            far,
            cached: Cell::new(None),
        })
    }

    pub fn set_fov(&mut self, fov_degrees: f32) -> PipelineResult<()> {
        if fov_degrees <= 0.0 || fov_degrees >= 360.0 {
            return Err(PipelineError::InvalidFov { fov_deg: fov_degrees });
        }
        self.fov_radians = fov_degrees.to_radians();
        self.invalidate();
        Ok(())
    }

    pub fn set_near_far(&mut self, near: f32, far: f32) -> PipelineResult<()> {
        if near <= 0.0 {
            return Err(PipelineError::NonPositiveNear { near });
        }
        if near >= far {
            return Err(PipelineError::InvalidNearFar { near, far });
        }
        self.near = near;
        self.far = far;
        self.invalidate();
        Ok(())
    }

    /// Share this camera's transform with another transformable object
    /// (e.g. a spotlight rigidly mounted to the camera). Future
    /// position/rotation updates on either are visible on both.
    pub fn link<T: Transform>(&mut self, other: &T) {
        self.transform = other.transform_cell().clone();
        self.invalidate();
    }

    /// Force the next `world_to_clip` call to recompute, regardless of
    /// the shared transform's generation. Used for changes this camera
    /// owns outright (FOV, near/far, re-linking) that the shared
    /// transform cell has no way to reflect in its generation counter.
    fn invalidate(&self) {
        self.cached.set(None);
    }

    /// Camera position, used directly by the fragment shader's specular term.
    pub fn world_position(&self) -> Vec3 {
        self.position()
    }
}

impl Transform for Camera {
    fn transform_cell(&self) -> &TransformCell {
        &self.transform
    }
}

impl Perspective for Camera {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn world_to_clip(&self) -> Mat4 {
        let TransformState { position, rotation, generation } = *self.transform.borrow();

        if let Some((cached_generation, cached)) = self.cached.get() {
            if cached_generation == generation {
                return cached;
            }
        }

        let view = (nalgebra::Isometry3::from_parts(position.into(), rotation)).inverse().to_homogeneous();
        let projection = perspective_zo(self.fov_radians, self.aspect_ratio(), self.near, self.far);

        let world_to_clip = projection * view;
        self.cached.set(Some((generation, world_to_clip)));
        world_to_clip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_dimensions() {
        assert!(Camera::new(0, 100, 60.0, 0.1, 100.0).is_err());
    }

    #[test]
    fn rejects_near_past_far() {
        assert!(Camera::new(100, 100, 60.0, 10.0, 1.0).is_err());
    }

    #[test]
    fn world_to_clip_is_cached_until_invalidated() {
        let cam = Camera::new(800, 600, 60.0, 0.1, 100.0).unwrap();
        let a = cam.world_to_clip();
        let b = cam.world_to_clip();
        assert_eq!(a, b);
    }

    #[test]
    fn linked_partner_move_invalidates_this_cameras_cache() {
        use crate::light::PerspectiveLight;

        let mut light = PerspectiveLight::new(64, 64, 45.0, 0.1, 50.0, crate::color::Rgba8::WHITE, 1.0, 0.0, 10.0, 20.0).unwrap();
        let camera = Camera::new(800, 600, 60.0, 0.1, 100.0).unwrap();

        light.link(&camera);

        let before = light.world_to_clip();
        camera.set_position(Vec3::new(5.0, 0.0, 0.0));
        let after = light.world_to_clip();

        assert_ne!(before, after, "linked light's cached world-to-clip must reflect the camera's new position");
    }
}
