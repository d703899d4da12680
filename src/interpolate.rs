//! Interpolation utilities shared by the clipper and the rasterizer.
//!
//! See <https://classes.soe.ucsc.edu/cmps160/Fall10/resources/barycentricInterpolation.pdf>.

use crate::math::{Vec2, Vec3, Vec4};

/// A type that can be linearly and barycentrically interpolated.
///
/// Implemented for the vertex attribute types directly rather than
/// generically over every `nalgebra` shape, since this crate only
/// ever interpolates a fixed, known set of attributes.
pub trait Lerp: Copy {
    fn lerp(t: f32, a: Self, b: Self) -> Self;
    fn bary(u: f32, a: Self, v: f32, b: Self, w: f32, c: Self) -> Self;
}

impl Lerp for f32 {
    #[inline]
    fn lerp(t: f32, a: Self, b: Self) -> Self {
        a + (b - a) * t
    }

    #[inline]
    fn bary(u: f32, a: Self, v: f32, b: Self, w: f32, c: Self) -> Self {
        a * u + b * v + c * w
    }
}

impl Lerp for Vec2 {
    #[inline]
    fn lerp(t: f32, a: Self, b: Self) -> Self {
        a + (b - a) * t
    }

    #[inline]
    fn bary(u: f32, a: Self, v: f32, b: Self, w: f32, c: Self) -> Self {
        a * u + b * v + c * w
    }
}

impl Lerp for Vec3 {
    #[inline]
    fn lerp(t: f32, a: Self, b: Self) -> Self {
        a + (b - a) * t
    }

    #[inline]
    fn bary(u: f32, a: Self, v: f32, b: Self, w: f32, c: Self) -> Self {
        a * u + b * v + c * w
    }
}

impl Lerp for Vec4 {
    #[inline]
    fn lerp(t: f32, a: Self, b: Self) -> Self {
        a + (b - a) * t
    }

    #[inline]
    fn bary(u: f32, a: Self, v: f32, b: Self, w: f32, c: Self) -> Self {
        a * u + b * v + c * w
    }
}
