//! Spotlights: perspective-shaped light sources that own a shadow-map
//! projection in addition to their radiant parameters.

use std::cell::Cell;

use crate::color::Rgba8;
use crate::error::{PipelineError, PipelineResult};
use crate::math::{perspective_zo, Mat4, Vec3};
use crate::transform::{Perspective, Transform, TransformCell, TransformState};

/// A `Copy`, `Sync` snapshot of one light's shading-relevant state,
/// taken once per frame and shared read-only across the tile worker
/// pool. See [`PerspectiveLight::snapshot`].
#[derive(Debug, Clone, Copy)]
pub struct LightUniform {
    pub position: Vec3,
    pub forward: Vec3,
    pub color: Rgba8,
    pub intensity: f32,
    pub quadratic_attenuation: f32,
    pub inner_cos: f32,
    pub outer_cos: f32,
}

/// A spotlight: position + direction, a cone defined by inner/outer
/// cutoff cosines, quadratic attenuation, and its own shadow-map
/// projection (so its world-to-clip matrix doubles as the shadow
/// pass's view-projection).
pub struct PerspectiveLight {
    transform: TransformCell,
    width: u32,
    height: u32,
    fov_radians: f32,
    near: f32,
    far: f32,
    /// The transform generation the cached matrix was computed against,
    /// alongside the matrix itself; see [`crate::camera::Camera`]'s
    /// field of the same shape.
    cached: Cell<Option<(u64, Mat4)>>,

    pub color: Rgba8,
    pub intensity: f32,
    pub quadratic_attenuation: f32,
    inner_cos: f32,
    outer_cos: f32,
}

impl PerspectiveLight {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: u32,
        height: u32,
        fov_degrees: f32,
        near: f32,
        far: f32,
        color: Rgba8,
        intensity: f32,
        quadratic_attenuation: f32,
        inner_deg: f32,
        outer_deg: f32,
    ) -> PipelineResult<PerspectiveLight> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidShadowMapDimensions { width: width as i64, height: height as i64 });
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

        Ok(PerspectiveLight {
            transform: TransformCell::new(Default::default()),
            width,
            height,
            fov_radians: fov_degrees.to_radians(),
            near,
            far,
            cached: Cell::new(None),
            color,
            intensity,
            quadratic_attenuation,
            inner_cos: inner_deg.to_radians().cos(),
            outer_cos: outer_deg.to_radians().cos(),
        })
    }

    pub fn inner_cos(&self) -> f32 {
        self.inner_cos
    }

    pub fn outer_cos(&self) -> f32 {
        self.outer_cos
    }

    /// Copy this light's shading-relevant state into a plain, `Sync`
    /// snapshot. The fragment shader runs on the tile worker pool and
    /// reads each light's position/forward/cone every covered sample;
    /// `PerspectiveLight` itself holds its transform behind an `Rc` (see
    /// [`crate::transform`]) so it can be cheaply linked to a camera,
    /// which makes it `!Sync`. Lights don't change mid-frame (§5: read
    /// only during a frame), so one snapshot per light per frame is all
    /// the worker pool needs.
    pub fn snapshot(&self) -> LightUniform {
        LightUniform {
            position: self.position(),
            forward: self.forward(),
            color: self.color,
            intensity: self.intensity,
            quadratic_attenuation: self.quadratic_attenuation,
            inner_cos: self.inner_cos,
            outer_cos: self.outer_cos,
        }
    }

    /// Share this light's transform with another transformable object
    /// (e.g. rigidly mounting it to a camera). Future position/rotation
    /// updates on either are visible on both.
    pub fn link<T: Transform>(&mut self, other: &T) {
        self.transform = other.transform_cell().clone();
        self.cached.set(None);
    }
}

impl Transform for PerspectiveLight {
    fn transform_cell(&self) -> &TransformCell {
        &self.transform
    }
}

impl Perspective for PerspectiveLight {
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
    use approx::assert_relative_eq;

    fn light() -> PerspectiveLight {
        PerspectiveLight::new(512, 512, 45.0, 0.1, 50.0, Rgba8::WHITE, 6.0, 0.0, 10.0, 20.0).unwrap()
    }

    #[test]
    fn spotlight_cone_boundary_scenario() {
        let l = light();
        // forward = (0, 0, -1) at the default identity rotation.
        assert_relative_eq!(l.forward().z, -1.0, epsilon = 1e-6);

        let outer = l.outer_cos();
        let inner = l.inner_cos();

        let c0 = 1.0_f32; // angle 0 deg
        assert!(c0 >= inner);

        let c15 = 15.0_f32.to_radians().cos();
        let spot15 = ((c15 - outer) / (inner - outer)).clamp(0.0, 1.0);
        let expected15 = (15.0_f32.to_radians().cos() - 20.0_f32.to_radians().cos())
            / (10.0_f32.to_radians().cos() - 20.0_f32.to_radians().cos());
        assert_relative_eq!(spot15, expected15, epsilon = 1e-4);

        let c25 = 25.0_f32.to_radians().cos();
        assert!(c25 <= outer);
    }

    #[test]
    fn rejects_bad_shadow_map_dims() {
        assert!(PerspectiveLight::new(0, 1, 45.0, 0.1, 10.0, Rgba8::WHITE, 1.0, 0.0, 5.0, 10.0).is_err());
    }

    #[test]
    fn moving_a_linked_camera_invalidates_the_lights_cached_matrix() {
        use crate::camera::Camera;

        let mut spotlight = light();
        let camera = Camera::new(64, 64, 60.0, 0.1, 100.0).unwrap();
        spotlight.link(&camera);

        let before = spotlight.world_to_clip();
        camera.set_position(Vec3::new(0.0, 3.0, 0.0));
        let after = spotlight.world_to_clip();

        assert_ne!(before, after, "a linked camera's move must be visible in the light's next world_to_clip call");
    }
}
