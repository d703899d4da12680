//! Math primitives.
//!
//! `nalgebra` is the only math library in the dependency graph, so it
//! is used directly rather than wrapped; these aliases just give the
//! rest of the crate short, renderer-flavored names for the types it
//! actually reaches for.

pub use nalgebra::{Matrix4, Point3, UnitQuaternion, Vector2, Vector3, Vector4};

pub type Vec2 = Vector2<f32>;
pub type Vec3 = Vector3<f32>;
pub type Vec4 = Vector4<f32>;
pub type Mat4 = Matrix4<f32>;
pub type Quat = UnitQuaternion<f32>;

/// Clamp `v` into `[lo, hi]`.
#[inline]
pub fn clamp(v: f32, lo: f32, hi: f32) -> f32 {
    if v < lo { lo } else if v > hi { hi } else { v }
}

#[inline]
pub fn saturate(v: f32) -> f32 {
    clamp(v, 0.0, 1.0)
}

#[inline]
pub fn lerp(t: f32, a: f32, b: f32) -> f32 {
    a + (b - a) * t
}

/// Right-handed perspective projection with NDC/clip-space depth in
/// `[0, 1]` (near -> 0, far -> 1), rather than `nalgebra::Perspective3`'s
/// OpenGL-style `[-1, 1]` range, to match the depth-buffer and deep
/// shadow map convention used throughout this crate.
pub fn perspective_zo(fovy_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fovy_radians * 0.5).tan();
    let a = far / (near - far);
    let b = (near * far) / (near - far);

    #[rustfmt::skip]
    let m = Mat4::new(
        f / aspect, 0.0, 0.0, 0.0,
        0.0,        f,   0.0, 0.0,
        0.0,        0.0, a,   b,
        0.0,        0.0, -1.0, 0.0,
    );
    m
}
