//! The fragment processor contract: one trait, three pass-specific,
//! zero-sized implementations, so the rasterizer's inner loop
//! monomorphizes per pass instead of dispatching dynamically.

use smallvec::SmallVec;

use crate::color::{is_opaque_alpha, src_over, Rgba8};
use crate::dsm::DeepShadowMap;
use crate::geometry::{Triangle, INLINE_LIGHTS};
use crate::light::LightUniform;
use crate::math::{Vec2, Vec3, Vec4};
use crate::shading::{shade_fragment, FragmentInputs, MaterialParams};
use crate::texture::Texture;

/// Perspective-corrected attributes recovered at one covered sample,
/// per spec §4.4 step 1: every `*_over_w` attribute is barycentrically
/// combined and then divided by the recovered `1/w`, except vertex
/// color, which is interpolated directly in barycentric space (no
/// perspective correction) for the untextured albedo path.
struct Recovered {
    world_position: Vec3,
    normal: Vec3,
    uv: Vec2,
    vertex_color: Vec4,
    light_clip_positions: SmallVec<[Vec4; INLINE_LIGHTS]>,
}

/// Recover perspective-correct attributes at barycentric weights `fw`.
/// Returns `None` when `1/w'` is degenerate (near-zero), in which case
/// the caller should fall back to the unlit albedo per spec §4.4.
fn recover(tri: &Triangle, fw: [f32; 3]) -> Option<Recovered> {
    let [a, b, c] = &tri.vertices;

    let inv_w_prime = a.inv_w * fw[0] + b.inv_w * fw[1] + c.inv_w * fw[2];
    if inv_w_prime.abs() < 1e-6 {
        return None;
    }
    let w_prime = 1.0 / inv_w_prime;

    let world4 = a.world_pos_over_w * fw[0] + b.world_pos_over_w * fw[1] + c.world_pos_over_w * fw[2];
    let world_position = (world4 * w_prime).xyz();

    let normal_raw = a.normal_over_w * fw[0] + b.normal_over_w * fw[1] + c.normal_over_w * fw[2];
    let normal = (normal_raw * w_prime).normalize();

    let uv_raw = (a.uv_over_w * fw[0] + b.uv_over_w * fw[1] + c.uv_over_w * fw[2]) * w_prime;
    let uv = Vec2::new(uv_raw.x.clamp(0.0, 1.0), uv_raw.y.clamp(0.0, 1.0));

    let vertex_color = a.color * fw[0] + b.color * fw[1] + c.color * fw[2];

    let light_count = a.light_clip_over_w.len();
    let mut light_clip_positions = SmallVec::new();
    for i in 0..light_count {
        let raw = a.light_clip_over_w[i] * fw[0] + b.light_clip_over_w[i] * fw[1] + c.light_clip_over_w[i] * fw[2];
        light_clip_positions.push(raw * w_prime);
    }

    Some(Recovered { world_position, normal, uv, vertex_color, light_clip_positions })
}

/// The fragment processor contract. `Ctx` is the pass-specific,
/// tile-local state the processor reads and writes (buffers, shadow
/// map, shared read-only frame data).
pub trait FragmentProcessor<Ctx> {
    fn process(ctx: &mut Ctx, local_x: u32, local_y: u32, z: f32, tri: &Triangle, fw: [f32; 3]);
}

/// Depth-only pass: write the depth buffer, no shading.
pub struct DepthOnly;

pub struct DepthOnlyCtx<'a> {
    pub depth: &'a mut [f32],
    pub width: u32,
}

impl FragmentProcessor<DepthOnlyCtx<'_>> for DepthOnly {
    fn process(ctx: &mut DepthOnlyCtx<'_>, local_x: u32, local_y: u32, z: f32, _tri: &Triangle, _fw: [f32; 3]) {
        let idx = (local_y * ctx.width + local_x) as usize;
        if z < ctx.depth[idx] {
            ctx.depth[idx] = z;
        }
    }
}

/// Opaque/transparent color pass: full Blinn-Phong shading, shadowed by
/// each light's deep shadow map.
pub struct ColorBlinnPhong;

pub struct ColorCtx<'a> {
    pub color: &'a mut [Rgba8],
    pub depth: &'a mut [f32],
    pub width: u32,
    pub texture: Option<&'a Texture>,
    pub lights: &'a [LightUniform],
    pub shadow_maps: &'a [DeepShadowMap],
    pub camera_position: Vec3,
    pub material: &'a MaterialParams,
}

impl FragmentProcessor<ColorCtx<'_>> for ColorBlinnPhong {
    fn process(ctx: &mut ColorCtx<'_>, local_x: u32, local_y: u32, z: f32, tri: &Triangle, fw: [f32; 3]) {
        let idx = (local_y * ctx.width + local_x) as usize;
        // Strict-greater, not `>=`: a fragment whose z exactly matches
        // the tile's seeded depth (e.g. the same triangle that set the
        // depth pre-pass's minimum at this sample) must still pass, or
        // the pre-pass's early rejection would silently blank every
        // pixel it seeded instead of accelerating the redundant work.
        if z > ctx.depth[idx] {
            return;
        }

        let shaded = match recover(tri, fw) {
            Some(r) => {
                let inputs = FragmentInputs {
                    world_position: r.world_position,
                    normal: r.normal,
                    uv: r.uv,
                    vertex_color: r.vertex_color,
                    light_clip_positions: &r.light_clip_positions,
                };
                shade_fragment(&inputs, ctx.texture, ctx.lights, ctx.shadow_maps, ctx.camera_position, ctx.material)
            }
            None => {
                // Degenerate w': fall back to the unlit albedo.
                let [a, b, c] = &tri.vertices;
                let color = a.color * fw[0] + b.color * fw[1] + c.color * fw[2];
                Rgba8::from_linear(color.xyz(), color.w)
            }
        };

        if is_opaque_alpha(shaded.a) {
            ctx.color[idx] = shaded;
            ctx.depth[idx] = z;
        } else {
            ctx.color[idx] = src_over(shaded, ctx.color[idx]);
        }
    }
}

/// Shadow pass: register a visibility point in the tile-local deep
/// shadow map; no color or depth-buffer writes.
pub struct ShadowDsm;

pub struct ShadowCtx<'a> {
    pub dsm: &'a mut DeepShadowMap,
    pub texture: Option<&'a Texture>,
}

impl FragmentProcessor<ShadowCtx<'_>> for ShadowDsm {
    fn process(ctx: &mut ShadowCtx<'_>, local_x: u32, local_y: u32, z: f32, tri: &Triangle, fw: [f32; 3]) {
        let alpha = match recover(tri, fw) {
            Some(r) => match ctx.texture {
                Some(tex) => tex.sample_bilinear(r.uv.x, r.uv.y).1,
                None => r.vertex_color.w,
            },
            None => {
                let [a, b, c] = &tri.vertices;
                (a.color.w * fw[0] + b.color.w * fw[1] + c.color.w * fw[2]).clamp(0.0, 1.0)
            }
        };

        ctx.dsm.add(local_x as i64, local_y as i64, z, alpha);
    }
}
