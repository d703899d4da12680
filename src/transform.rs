//! Shared position/rotation state for cameras and lights.
//!
//! Cameras and lights both need a position and orientation, and the
//! two may be *linked* (e.g. a spotlight rigidly attached to the
//! camera) so that moving one moves the other. Linked objects share
//! the same backing cell, so the position/rotation themselves are
//! trivially shared; what is *not* shared automatically is each
//! object's own cached world-to-clip matrix (the projection differs
//! per object, so the cache can't live in the cell as a single
//! matrix). `generation` is bumped on every `set_position`/
//! `set_rotation` so a linked object can tell its cache is stale
//! without an observer list: it just compares the generation it
//! cached against the cell's current one.

use std::cell::RefCell;
use std::rc::Rc;

use crate::math::{Quat, Vec3};

#[derive(Debug, Clone, Copy)]
pub struct TransformState {
    pub position: Vec3,
    pub rotation: Quat,
    /// Bumped on every position/rotation write; linked objects compare
    /// this against the generation they last cached a matrix against.
    pub generation: u64,
}

impl Default for TransformState {
    fn default() -> Self {
        TransformState { position: Vec3::zeros(), rotation: Quat::identity(), generation: 0 }
    }
}

/// Shared handle to a transform. Cloning shares the underlying state;
/// use [`Transform::link`] to make two objects move together.
pub type TransformCell = Rc<RefCell<TransformState>>;

/// Position/rotation accessors common to cameras and lights.
pub trait Transform {
    fn transform_cell(&self) -> &TransformCell;

    fn position(&self) -> Vec3 {
        self.transform_cell().borrow().position
    }

    fn set_position(&self, position: Vec3) {
        let mut state = self.transform_cell().borrow_mut();
        state.position = position;
        state.generation = state.generation.wrapping_add(1);
    }

    fn rotation(&self) -> Quat {
        self.transform_cell().borrow().rotation
    }

    fn set_rotation(&self, rotation: Quat) {
        let mut state = self.transform_cell().borrow_mut();
        state.rotation = rotation;
        state.generation = state.generation.wrapping_add(1);
    }

    /// Current generation of the shared transform, used by implementors
    /// to detect a linked partner's update and recompute their own
    /// cached world-to-clip matrix.
    fn generation(&self) -> u64 {
        self.transform_cell().borrow().generation
    }

    /// Forward direction implied by the current rotation (camera/light
    /// space -Z rotated into world space).
    fn forward(&self) -> Vec3 {
        self.rotation() * -Vec3::z()
    }
}

/// Width/height in pixels plus a cached world-to-clip matrix.
///
/// Implementors are responsible for invalidating and recomputing the
/// cached matrix whenever a transform, FOV, or near/far plane changes.
pub trait Perspective {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn world_to_clip(&self) -> crate::math::Mat4;

    #[inline]
    fn aspect_ratio(&self) -> f32 {
        self.width() as f32 / self.height() as f32
    }
}
