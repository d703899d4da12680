//! Texture sampling.
//!
//! Decoding an image file into pixels is an external collaborator's
//! job (see the crate's top-level docs); this module only owns the
//! decoded pixel buffer and the sampling math the fragment shader
//! stage needs.

use crate::color::Rgba8;
use crate::math::Vec3;

/// A decoded RGBA8 texture, already resident in memory.
#[derive(Debug, Clone)]
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<Rgba8>,
    /// True iff every pixel's alpha channel is 255.
    pub is_opaque: bool,
}

impl Texture {
    /// Build a texture from a row-major RGBA8 pixel buffer produced by an
    /// external decoder. `is_opaque` is computed once here rather than
    /// re-scanned every frame.
    pub fn new(width: u32, height: u32, pixels: Vec<Rgba8>) -> Texture {
        assert_eq!(pixels.len(), (width as usize) * (height as usize));

        let is_opaque = pixels.iter().all(|p| p.a == 255);

        Texture { width, height, pixels, is_opaque }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn texel(&self, x: u32, y: u32) -> Rgba8 {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        self.pixels[(y * self.width + x) as usize]
    }

    /// Bilinear-filtered sample at UV coordinates, clamped to the edge.
    ///
    /// Returns linear-space RGB plus a separate alpha in `[0, 1]`.
    pub fn sample_bilinear(&self, u: f32, v: f32) -> (Vec3, f32) {
        let u = u.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);

        let fx = u * (self.width as f32) - 0.5;
        let fy = v * (self.height as f32) - 0.5;

        let x0f = fx.floor();
        let y0f = fy.floor();
        let tx = fx - x0f;
        let ty = fy - y0f;

        let x0 = x0f.max(0.0) as u32;
        let y0 = y0f.max(0.0) as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let c00 = self.texel(x0, y0);
        let c10 = self.texel(x1, y0);
        let c01 = self.texel(x0, y1);
        let c11 = self.texel(x1, y1);

        let mix = |a: u8, b: u8, t: f32| -> f32 { (a as f32) + ((b as f32) - (a as f32)) * t };

        let top_r = mix(c00.r, c10.r, tx);
        let top_g = mix(c00.g, c10.g, tx);
        let top_b = mix(c00.b, c10.b, tx);
        let top_a = mix(c00.a, c10.a, tx);

        let bot_r = mix(c01.r, c11.r, tx);
        let bot_g = mix(c01.g, c11.g, tx);
        let bot_b = mix(c01.b, c11.b, tx);
        let bot_a = mix(c01.a, c11.a, tx);

        let r = top_r + (bot_r - top_r) * ty;
        let g = top_g + (bot_g - top_g) * ty;
        let b = top_b + (bot_b - top_b) * ty;
        let a = top_a + (bot_a - top_a) * ty;

        (Vec3::new(r / 255.0, g / 255.0, b / 255.0), a / 255.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_texture_samples_constant() {
        let px = vec![Rgba8::new(10, 20, 30, 255); 4];
        let tex = Texture::new(2, 2, px);
        let (rgb, a) = tex.sample_bilinear(0.5, 0.5);
        assert!((rgb.x - 10.0 / 255.0).abs() < 1e-5);
        assert!((rgb.y - 20.0 / 255.0).abs() < 1e-5);
        assert!((rgb.z - 30.0 / 255.0).abs() < 1e-5);
        assert!((a - 1.0).abs() < 1e-5);
        assert!(tex.is_opaque);
    }

    #[test]
    fn translucent_texture_is_not_opaque() {
        let px = vec![Rgba8::new(1, 2, 3, 200), Rgba8::new(1, 2, 3, 255)];
        let tex = Texture::new(2, 1, px);
        assert!(!tex.is_opaque);
    }
}
