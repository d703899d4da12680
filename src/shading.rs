//! Per-fragment Blinn-Phong shading with deep-shadow-map attenuation.
//!
//! Grounded on the source crate's `full_example` fragment shader (view
//! vector, halfway vector, per-light accumulation loop), simplified to
//! the fixed-function lighting model this pipeline implements (no
//! Fresnel blending, tonemapping or gamma correction) and extended with
//! the shadow and spotlight-cone terms this spec requires.

use crate::color::Rgba8;
use crate::dsm::DeepShadowMap;
use crate::light::LightUniform;
use crate::math::{saturate, Vec2, Vec3, Vec4};
use crate::texture::Texture;

/// Perspective-corrected, already-interpolated inputs to the fragment
/// shader for a single covered sample.
pub struct FragmentInputs<'a> {
    pub world_position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    /// Interpolated vertex color, used as the albedo when no texture is bound.
    pub vertex_color: Vec4,
    /// Each configured light's interpolated clip-space position, aligned
    /// index-for-index with the `lights`/`shadow_maps` slices passed to
    /// [`shade_fragment`].
    pub light_clip_positions: &'a [Vec4],
}

/// Material scalars constant for the whole frame.
#[derive(Debug, Clone, Copy)]
pub struct MaterialParams {
    pub ambient_rgb: Vec3,
    pub specular_strength: f32,
    pub shininess: f32,
}

/// Evaluate Blinn-Phong lighting, shadowed by each light's deep shadow
/// map, for one covered fragment. Returns the final 8-bit RGBA color.
pub fn shade_fragment(
    inputs: &FragmentInputs,
    texture: Option<&Texture>,
    lights: &[LightUniform],
    shadow_maps: &[DeepShadowMap],
    camera_position: Vec3,
    material: &MaterialParams,
) -> Rgba8 {
    let (albedo, alpha) = match texture {
        Some(tex) => tex.sample_bilinear(inputs.uv.x, inputs.uv.y),
        None => (inputs.vertex_color.xyz(), inputs.vertex_color.w),
    };

    let mut accumulated = material.ambient_rgb.component_mul(&albedo);

    let view_dir_input = camera_position - inputs.world_position;
    if view_dir_input.norm_squared() < 1e-12 {
        return Rgba8::from_linear(accumulated, alpha);
    }
    let view_dir = view_dir_input.normalize();

    for (i, light) in lights.iter().enumerate() {
        let light_clip = match inputs.light_clip_positions.get(i) {
            Some(p) => *p,
            None => continue,
        };

        if light_clip.w.abs() < 1e-6 {
            continue;
        }
        if light_clip.x.abs() > light_clip.w || light_clip.y.abs() > light_clip.w || light_clip.z < 0.0 || light_clip.z > light_clip.w {
            continue;
        }

        let inv_w = 1.0 / light_clip.w;
        let ndc = Vec3::new(light_clip.x * inv_w, light_clip.y * inv_w, light_clip.z * inv_w);

        let shadow_map = &shadow_maps[i];
        let sx = (ndc.x + 1.0) * 0.5 * shadow_map.width() as f32;
        let sy = (1.0 - ndc.y) * 0.5 * shadow_map.height() as f32;

        if sx < 0.0 || sy < 0.0 || sx >= shadow_map.width() as f32 || sy >= shadow_map.height() as f32 {
            continue;
        }

        let vis = shadow_map.sample(sx.floor() as u32, sy.floor() as u32, ndc.z);
        if vis <= 1e-4 {
            continue;
        }

        let light_vec = light.position - inputs.world_position;
        let dist_sq = light_vec.norm_squared();
        if dist_sq < 1e-12 {
            continue;
        }
        let light_dir = light_vec / dist_sq.sqrt();
        let attenuation = 1.0 / (1.0 + light.quadratic_attenuation * dist_sq);

        let cos_angle = light.forward.dot(&(-light_dir));
        if cos_angle <= light.outer_cos {
            continue;
        }
        let spot = if cos_angle >= light.inner_cos {
            1.0
        } else {
            saturate((cos_angle - light.outer_cos) / (light.inner_cos - light.outer_cos))
        };

        let n_dot_l = saturate(inputs.normal.dot(&light_dir));
        let light_color = light.color.to_linear_rgb();
        let diffuse = albedo.component_mul(&light_color) * n_dot_l;

        let half_vector = (light_dir + view_dir).normalize();
        let n_dot_h = saturate(inputs.normal.dot(&half_vector));
        let specular = light_color * material.specular_strength * n_dot_h.powf(material.shininess);

        accumulated += (diffuse + specular) * (light.intensity * attenuation * vis * spot);
    }

    Rgba8::from_linear(accumulated, alpha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgba8;
    use crate::light::PerspectiveLight;

    fn straight_down_light() -> LightUniform {
        PerspectiveLight::new(64, 64, 60.0, 0.1, 100.0, Rgba8::WHITE, 4.0, 0.1, 45.0, 60.0).unwrap().snapshot()
    }

    #[test]
    fn fully_shadowed_light_contributes_nothing_beyond_ambient() {
        let light = straight_down_light();
        let shadow_map = {
            let mut dsm = DeepShadowMap::new(64, 64);
            // opaque occluder directly in front of every shadow-map pixel
            for y in 0..64 {
                for x in 0..64 {
                    dsm.add(x, y, 0.01, 1.0);
                }
            }
            dsm.initialize();
            dsm
        };

        let inputs = FragmentInputs {
            world_position: Vec3::new(0.0, 0.0, -5.0),
            normal: Vec3::new(0.0, 0.0, 1.0),
            uv: Vec2::new(0.0, 0.0),
            vertex_color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            light_clip_positions: &[Vec4::new(0.0, 0.0, 0.5, 1.0)],
        };

        let material = MaterialParams { ambient_rgb: Vec3::new(0.1, 0.1, 0.1), specular_strength: 0.5, shininess: 32.0 };

        let color = shade_fragment(&inputs, None, std::slice::from_ref(&light), std::slice::from_ref(&shadow_map), Vec3::new(0.0, 0.0, 0.0), &material);

        // Ambient-only: albedo (1,1,1) * ambient (0.1,0.1,0.1) = 0.1 each channel.
        assert!((color.r as i32 - 26).abs() <= 2, "expected near-ambient-only red channel, got {}", color.r);
    }

    #[test]
    fn light_outside_cone_contributes_nothing() {
        let light = straight_down_light();
        let shadow_map = DeepShadowMap::new(4, 4);

        // clip position far off-axis from the spotlight's forward (-Z) direction
        let inputs = FragmentInputs {
            world_position: Vec3::new(50.0, 50.0, -5.0),
            normal: Vec3::new(0.0, 0.0, 1.0),
            uv: Vec2::new(0.0, 0.0),
            vertex_color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            light_clip_positions: &[Vec4::new(2.0, 2.0, 0.5, 1.0)],
        };

        let material = MaterialParams { ambient_rgb: Vec3::zeros(), specular_strength: 0.5, shininess: 32.0 };
        let color = shade_fragment(&inputs, None, std::slice::from_ref(&light), std::slice::from_ref(&shadow_map), Vec3::zeros(), &material);
        assert_eq!(color, Rgba8::new(0, 0, 0, 255));
    }
}
