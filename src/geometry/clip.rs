//! Homogeneous clip-space polygon clipping (Sutherland-Hodgman in 4D).
//!
//! Adapted from the source crate's `ClippingPlane` (`has_inside` /
//! `intersect` against `w`-relative half-spaces), generalized from a
//! single-edge helper into a full polygon clip, and with the near/far
//! pair changed from the `[-w, w]` depth convention to this crate's
//! `z in [0, w]` range.

use smallvec::SmallVec;

use crate::geometry::vertex::Vertex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClippingPlane {
    Left,
    Right,
    Top,
    Bottom,
    Near,
    Far,
}

pub const ALL_CLIPPING_PLANES: [ClippingPlane; 6] = [
    ClippingPlane::Left,
    ClippingPlane::Right,
    ClippingPlane::Top,
    ClippingPlane::Bottom,
    ClippingPlane::Near,
    ClippingPlane::Far,
];

impl ClippingPlane {
    #[inline]
    fn has_inside(self, v: &Vertex) -> bool {
        let p = v.clip_position;
        match self {
            ClippingPlane::Left => p.x >= -p.w,
            ClippingPlane::Right => p.x <= p.w,
            ClippingPlane::Top => p.y >= -p.w,
            ClippingPlane::Bottom => p.y <= p.w,
            ClippingPlane::Near => p.z >= 0.0,
            ClippingPlane::Far => p.z <= p.w,
        }
    }

    /// Vertex at the intersection of edge `v1 -> v2` with this plane.
    fn intersect(self, v1: &Vertex, v2: &Vertex) -> Vertex {
        let p1 = v1.clip_position;
        let p2 = v2.clip_position;

        let (a, b) = match self {
            ClippingPlane::Left => (p1.w + p1.x, p2.w + p2.x),
            ClippingPlane::Right => (p1.w - p1.x, p2.w - p2.x),
            ClippingPlane::Top => (p1.w + p1.y, p2.w + p2.y),
            ClippingPlane::Bottom => (p1.w - p1.y, p2.w - p2.y),
            ClippingPlane::Near => (p1.z, p2.z),
            ClippingPlane::Far => (p1.w - p1.z, p2.w - p2.z),
        };

        let t = a / (a - b);
        Vertex::lerp(t, v1, v2)
    }
}

/// Clip a convex polygon (as an ordered vertex list) against a single plane.
fn clip_against_plane(input: &[Vertex], plane: ClippingPlane) -> SmallVec<[Vertex; 8]> {
    let mut output = SmallVec::new();

    if input.is_empty() {
        return output;
    }

    for i in 0..input.len() {
        let current = &input[i];
        let previous = &input[(i + input.len() - 1) % input.len()];

        let current_inside = plane.has_inside(current);
        let previous_inside = plane.has_inside(previous);

        if current_inside {
            if !previous_inside {
                output.push(plane.intersect(previous, current));
            }
            output.push(current.clone());
        } else if previous_inside {
            output.push(plane.intersect(previous, current));
        }
    }

    output
}

/// Clip a triangle against all six homogeneous clip planes, returning
/// the resulting convex polygon's vertices in fan order (empty if the
/// triangle is fully outside any plane, otherwise between 3 and 9
/// vertices).
pub fn clip_triangle(a: Vertex, b: Vertex, c: Vertex) -> SmallVec<[Vertex; 9]> {
    let mut polygon: SmallVec<[Vertex; 9]> = SmallVec::new();
    let mut current: SmallVec<[Vertex; 8]> = SmallVec::from_vec(vec![a, b, c]);

    for &plane in &ALL_CLIPPING_PLANES {
        current = clip_against_plane(&current, plane);
        if current.is_empty() {
            return polygon;
        }
    }

    polygon.extend(current);
    polygon
}

/// Fan-triangulate a convex polygon's vertex list: `(v0, v1, v2), (v0, v2, v3), ...`
pub fn fan_triangulate(polygon: &[Vertex]) -> Vec<[Vertex; 3]> {
    if polygon.len() < 3 {
        return Vec::new();
    }

    let mut triangles = Vec::with_capacity(polygon.len() - 2);
    for i in 1..polygon.len() - 1 {
        triangles.push([polygon[0].clone(), polygon[i].clone(), polygon[i + 1].clone()]);
    }
    triangles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Vec2, Vec3, Vec4};

    fn v(clip: Vec4) -> Vertex {
        Vertex::pre_clip_init(clip, clip, Vec3::new(0.0, 0.0, 1.0), Vec2::new(0.0, 0.0), Vec4::new(1.0, 1.0, 1.0, 1.0))
    }

    #[test]
    fn clips_triangle_crossing_near_plane() {
        let a = v(Vec4::new(0.0, 0.0, -0.5, 1.0));
        let b = v(Vec4::new(1.0, 0.0, 0.5, 1.0));
        let c = v(Vec4::new(0.0, 1.0, 0.5, 1.0));

        let polygon = clip_triangle(a, b, c);
        assert_eq!(polygon.len(), 4, "expected a quad from clipping one vertex behind the near plane");

        for vtx in &polygon {
            assert!(vtx.clip_position.z >= -1e-5, "all output vertices must satisfy z >= 0");
        }

        let triangles = fan_triangulate(&polygon);
        assert_eq!(triangles.len(), 2);
    }

    #[test]
    fn fully_inside_triangle_is_unclipped() {
        let a = v(Vec4::new(-0.2, -0.2, 0.5, 1.0));
        let b = v(Vec4::new(0.2, -0.2, 0.5, 1.0));
        let c = v(Vec4::new(0.0, 0.2, 0.5, 1.0));

        let polygon = clip_triangle(a, b, c);
        assert_eq!(polygon.len(), 3);
    }

    #[test]
    fn fully_outside_triangle_is_dropped() {
        let a = v(Vec4::new(10.0, 10.0, 0.5, 1.0));
        let b = v(Vec4::new(11.0, 10.0, 0.5, 1.0));
        let c = v(Vec4::new(10.0, 11.0, 0.5, 1.0));

        let polygon = clip_triangle(a, b, c);
        assert!(polygon.is_empty());
    }

    #[test]
    fn clipped_vertices_satisfy_all_six_planes() {
        let a = v(Vec4::new(0.0, 0.0, -0.5, 1.0));
        let b = v(Vec4::new(2.0, 0.0, 0.5, 1.0));
        let c = v(Vec4::new(0.0, 2.0, 0.5, 1.0));

        let polygon = clip_triangle(a, b, c);
        for vtx in &polygon {
            for &plane in &ALL_CLIPPING_PLANES {
                assert!(plane.has_inside(vtx), "{:?} violated by {:?}", plane, vtx.clip_position);
            }
        }
    }
}
