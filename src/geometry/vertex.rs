//! Runtime vertex type carried through clipping and into the rasterizer.

use smallvec::SmallVec;

use crate::interpolate::Lerp;
use crate::math::{Vec2, Vec3, Vec4};

/// Input geometry attached to a mesh vertex, before any per-frame transform.
#[derive(Debug, Clone, Copy)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    /// Linear-space RGBA in `[0, 1]`.
    pub color: Vec4,
}

/// Up to this many lights get a dedicated slot in a vertex's light-clip
/// array without spilling to the heap; scenes with more lights still
/// work, just with one allocation per vertex.
pub const INLINE_LIGHTS: usize = 4;

/// A vertex as it flows through the geometry pipeline and the clipper.
///
/// The `*_over_w` fields and `inv_w` are valid only once the vertex has
/// gone through [`Vertex::pre_clip_init`] (or been produced by clipping,
/// which maintains the invariant through [`Vertex::lerp`]).
#[derive(Debug, Clone)]
pub struct Vertex {
    pub clip_position: Vec4,
    pub world_position: Vec4,
    pub normal: Vec3,
    pub uv: Vec2,
    pub color: Vec4,

    pub inv_w: f32,
    pub world_pos_over_w: Vec4,
    pub normal_over_w: Vec3,
    pub uv_over_w: Vec2,

    /// Each configured light's clip-space position divided by the
    /// camera clip `w`, attached after clipping (step 4 of the
    /// geometry pipeline); empty until then.
    pub light_clip_over_w: SmallVec<[Vec4; INLINE_LIGHTS]>,
}

impl Vertex {
    /// Build a vertex from mesh-space attributes plus the already
    /// transformed world and clip positions, and prepare the
    /// perspective-correct fields ("pre-clip init").
    pub fn pre_clip_init(world_position: Vec4, clip_position: Vec4, normal: Vec3, uv: Vec2, color: Vec4) -> Vertex {
        let inv_w = 1.0 / clip_position.w;

        Vertex {
            clip_position,
            world_position,
            normal,
            uv,
            color,
            inv_w,
            world_pos_over_w: world_position * inv_w,
            normal_over_w: normal * inv_w,
            uv_over_w: uv * inv_w,
            light_clip_over_w: SmallVec::new(),
        }
    }

    /// Recompute `inv_w` and the `*_over_w` fields from the current
    /// `clip_position.w` and attribute values. Used after any edit to
    /// clip/world/attributes that doesn't go through `pre_clip_init`.
    fn refresh_over_w(&mut self) {
        self.inv_w = 1.0 / self.clip_position.w;
        self.world_pos_over_w = self.world_position * self.inv_w;
        self.normal_over_w = self.normal * self.inv_w;
        self.uv_over_w = self.uv * self.inv_w;
    }

    /// Linear interpolation of two pre-clip-initialized vertices, as
    /// used by the Sutherland-Hodgman clipper to build a new vertex at
    /// an edge/plane intersection. Interpolates clip position, world
    /// position, color, UV and normal linearly, then recomputes the
    /// perspective-prepared fields from the *new* clip.w, per the
    /// clipping algorithm (the light-clip array is attached later and
    /// is not carried through this interpolation).
    pub fn lerp(t: f32, a: &Vertex, b: &Vertex) -> Vertex {
        let mut out = Vertex {
            clip_position: Vec4::lerp(t, a.clip_position, b.clip_position),
            world_position: Vec4::lerp(t, a.world_position, b.world_position),
            normal: Vec3::lerp(t, a.normal, b.normal),
            uv: Vec2::lerp(t, a.uv, b.uv),
            color: Vec4::lerp(t, a.color, b.color),
            inv_w: 0.0,
            world_pos_over_w: Vec4::zeros(),
            normal_over_w: Vec3::zeros(),
            uv_over_w: Vec2::zeros(),
            light_clip_over_w: SmallVec::new(),
        };
        out.refresh_over_w();
        out
    }
}
