//! Deep shadow maps: a per-pixel visibility-vs-depth function that
//! supports translucent occluders, built during the shadow pass and
//! sampled during the color pass.

use crate::math::saturate;

/// Default epsilon for the slope-interval compression pass. The lower
/// of the two values commonly attested for this kind of simplification;
/// chosen here to favor shadow quality over map size.
pub const DEFAULT_COMPRESSION_EPSILON: f32 = 0.0125;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityPoint {
    pub depth: f32,
    pub visibility: f32,
}

/// The visibility-vs-depth function at a single shadow-map pixel.
///
/// Before [`VisibilityFunction::initialize`] the points are a raw,
/// depth-unsorted log of insertions (visibility holding transparency,
/// `1 - alpha`, of each translucent fragment). After it they are the
/// finalized, sorted, cumulative, compressed function.
#[derive(Debug, Clone)]
pub struct VisibilityFunction {
    points: Vec<VisibilityPoint>,
    opaque_depth: Option<f32>,
}

impl Default for VisibilityFunction {
    fn default() -> Self {
        VisibilityFunction { points: Vec::new(), opaque_depth: None }
    }
}

impl VisibilityFunction {
    /// Record a fragment at depth `z` with alpha `a` (`a` in `[0, 1]`).
    /// Out-of-range alpha is clamped by the caller; this function treats
    /// `a >= 1.0` as fully opaque.
    pub fn add(&mut self, z: f32, a: f32) {
        if a >= 1.0 {
            self.opaque_depth = Some(match self.opaque_depth {
                Some(existing) => existing.min(z),
                None => z,
            });
            return;
        }

        if a > 0.0 {
            if let Some(opaque_depth) = self.opaque_depth {
                if opaque_depth <= z {
                    return;
                }
            }
            self.points.push(VisibilityPoint { depth: z, visibility: 1.0 - a });
        }
    }

    /// Finalize the function: prune, sort, accumulate, and compress.
    /// Idempotent only in the sense that calling it twice without new
    /// `add` calls in between leaves the (already compressed) points
    /// as-is; it is meant to be called exactly once per pixel per frame.
    pub fn initialize(&mut self, epsilon: f32) {
        if let Some(opaque_depth) = self.opaque_depth {
            // Points recorded behind the opaque cap can only arise from
            // submission-order effects within the shadow pass, not true
            // depth ordering; they must not contribute to the function.
            self.points.retain(|p| p.depth <= opaque_depth);
            self.points.push(VisibilityPoint { depth: opaque_depth, visibility: 0.0 });
        }

        self.points.sort_by(|a, b| a.depth.partial_cmp(&b.depth).unwrap());

        let mut cumulative = 1.0_f32;
        for (i, p) in self.points.iter_mut().enumerate() {
            if i == 0 {
                cumulative = p.visibility;
            } else {
                cumulative = (cumulative * p.visibility).max(0.0);
            }
            p.visibility = cumulative;
        }

        // The function always starts at (0, 1) per the invariant.
        self.points.insert(0, VisibilityPoint { depth: 0.0, visibility: 1.0 });

        self.points = compress(&self.points, epsilon);
    }

    /// Sample visibility at depth `z`, subtracting the caller-supplied
    /// bias first. Returns 0 once `z` passes the opaque cap.
    pub fn sample(&self, z: f32, bias: f32) -> f32 {
        let z = z - bias;

        if let Some(opaque_depth) = self.opaque_depth {
            if z >= opaque_depth {
                return 0.0;
            }
        }

        if self.points.is_empty() {
            return 1.0;
        }

        if self.points.len() <= 25 {
            let mut result = self.points[0].visibility;
            for p in &self.points {
                if p.depth <= z {
                    result = p.visibility;
                } else {
                    break;
                }
            }
            result
        } else {
            let mut lo = 0usize;
            let mut hi = self.points.len();
            while lo < hi {
                let mid = (lo + hi) / 2;
                if self.points[mid].depth <= z {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            self.points[lo.saturating_sub(1)].visibility
        }
    }

    /// Merge a tile-local function's non-initial points into this (main)
    /// function, folding `opaque_depth` by minimum. Used to fold a
    /// worker's tile-sized shadow map into the pipeline's main DSM pixel.
    pub fn merge(&mut self, other: &VisibilityFunction) {
        self.opaque_depth = match (self.opaque_depth, other.opaque_depth) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };
        self.points.extend(other.points.iter().copied());
    }

    #[cfg(test)]
    pub fn points(&self) -> &[VisibilityPoint] {
        &self.points
    }
}

/// Slope-interval compression: simplify a sorted, cumulative-visibility
/// point list to within `epsilon` while preserving its first point.
fn compress(points: &[VisibilityPoint], epsilon: f32) -> Vec<VisibilityPoint> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let mut out = Vec::with_capacity(points.len());
    out.push(points[0]);

    let mut anchor = 0usize;
    let mut m_lo = f32::NEG_INFINITY;
    let mut m_hi = f32::INFINITY;

    let mut j = 1usize;
    while j < points.len() {
        let z0 = points[anchor].depth;
        let v0 = points[anchor].visibility;
        let dz = points[j].depth - z0;

        if dz <= 0.0 {
            j += 1;
            continue;
        }

        let upper = (points[j].visibility + epsilon - v0) / dz;
        let lower = (points[j].visibility - epsilon - v0) / dz;

        let new_lo = m_lo.max(lower);
        let new_hi = m_hi.min(upper);

        if new_lo > new_hi {
            let breakpoint = &points[j - 1];
            let mid_slope = (m_lo + m_hi) / 2.0;
            let z_bp = breakpoint.depth;
            let v_bp = saturate(v0 + mid_slope * (z_bp - z0));
            out.push(VisibilityPoint { depth: z_bp, visibility: v_bp });

            anchor = j - 1;
            m_lo = f32::NEG_INFINITY;
            m_hi = f32::INFINITY;
            // Don't advance `j`: re-evaluate this point against the new anchor.
            continue;
        }

        m_lo = new_lo;
        m_hi = new_hi;
        j += 1;
    }

    out.push(*points.last().unwrap());
    out
}

/// A 2D grid of [`VisibilityFunction`]s, one per shadow-map pixel.
pub struct DeepShadowMap {
    width: u32,
    height: u32,
    bias: f32,
    functions: Vec<VisibilityFunction>,
}

impl DeepShadowMap {
    pub fn new(width: u32, height: u32) -> DeepShadowMap {
        let bias = (0.5 / width as f32).max(0.5 / height as f32);
        DeepShadowMap {
            width,
            height,
            bias,
            functions: (0..(width as usize * height as usize)).map(|_| VisibilityFunction::default()).collect(),
        }
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.width && y < self.height {
            Some((y * self.width + x) as usize)
        } else {
            None
        }
    }

    /// Record a fragment. Silently ignores out-of-bounds coordinates.
    pub fn add(&mut self, x: i64, y: i64, z: f32, a: f32) {
        if x < 0 || y < 0 {
            return;
        }
        if let Some(idx) = self.index(x as u32, y as u32) {
            self.functions[idx].add(z, a);
        }
    }

    /// Finalize every pixel's visibility function.
    pub fn initialize(&mut self) {
        self.initialize_with_epsilon(DEFAULT_COMPRESSION_EPSILON);
    }

    pub fn initialize_with_epsilon(&mut self, epsilon: f32) {
        for f in &mut self.functions {
            f.initialize(epsilon);
        }
    }

    /// Sample visibility at `(x, y, z)`. Out-of-bounds coordinates are
    /// fully lit (matches the shading stage's own off-frustum rejection,
    /// so this is never hit on a valid light-space coordinate).
    pub fn sample(&self, x: u32, y: u32, z: f32) -> f32 {
        match self.index(x, y) {
            Some(idx) => self.functions[idx].sample(z, self.bias),
            None => 1.0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fold a tile-local shadow map's contributions into this (main) map
    /// at the tile's pixel offset.
    pub fn merge_tile(&mut self, tile: &DeepShadowMap, offset_x: u32, offset_y: u32) {
        for ty in 0..tile.height {
            for tx in 0..tile.width {
                if let (Some(dst_idx), Some(src_idx)) = (self.index(offset_x + tx, offset_y + ty), tile.index(tx, ty)) {
                    self.functions[dst_idx].merge(&tile.functions[src_idx]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_fragment_caps_visibility() {
        let mut f = VisibilityFunction::default();
        f.add(5.0, 1.0);
        f.initialize(DEFAULT_COMPRESSION_EPSILON);
        assert_eq!(f.sample(10.0, 0.0), 0.0);
        assert_eq!(f.sample(0.0, 0.0), 1.0);
    }

    #[test]
    fn translucent_occluder_attenuates_without_fully_blocking() {
        let mut f = VisibilityFunction::default();
        f.add(5.0, 0.5); // 50% opaque -> 50% transparency recorded
        f.initialize(DEFAULT_COMPRESSION_EPSILON);
        let vis_before = f.sample(4.0, 0.0);
        let vis_after = f.sample(6.0, 0.0);
        assert_eq!(vis_before, 1.0);
        assert!((vis_after - 0.5).abs() < 1e-5);
    }

    #[test]
    fn two_translucent_layers_multiply_cumulatively() {
        let mut f = VisibilityFunction::default();
        f.add(2.0, 0.5);
        f.add(4.0, 0.5);
        f.initialize(DEFAULT_COMPRESSION_EPSILON);
        let vis_far = f.sample(5.0, 0.0);
        assert!((vis_far - 0.25).abs() < 1e-5, "expected 0.5 * 0.5 = 0.25, got {vis_far}");
    }

    #[test]
    fn points_behind_opaque_cap_are_pruned() {
        let mut f = VisibilityFunction::default();
        f.add(10.0, 1.0); // opaque at z=10
        f.add(15.0, 0.5); // translucent behind the opaque cap: should be pruned
        f.initialize(DEFAULT_COMPRESSION_EPSILON);
        assert_eq!(f.sample(20.0, 0.0), 0.0);
        // if the pruned point had survived, sampling just before z=10 would
        // still show full visibility since it's in front of both points.
        assert_eq!(f.sample(1.0, 0.0), 1.0);
    }

    #[test]
    fn bias_shifts_sample_depth() {
        let mut dsm = DeepShadowMap::new(4, 4);
        dsm.add(1, 1, 5.0, 1.0);
        dsm.initialize();
        // bias = max(0.5/4, 0.5/4) = 0.125; sampling at z=5.1 - 0.125 = 4.975 < 5 -> lit
        assert_eq!(dsm.sample(1, 1, 5.1), 1.0);
        assert_eq!(dsm.sample(1, 1, 5.2), 0.0);
    }

    #[test]
    fn out_of_bounds_add_is_ignored() {
        let mut dsm = DeepShadowMap::new(2, 2);
        dsm.add(-1, 0, 5.0, 1.0);
        dsm.add(5, 5, 5.0, 1.0);
        dsm.initialize();
        assert_eq!(dsm.sample(0, 0, 100.0), 1.0);
    }

    #[test]
    fn tile_merge_folds_into_main_map() {
        let mut tile = DeepShadowMap::new(2, 2);
        tile.add(0, 0, 3.0, 1.0);

        let mut main = DeepShadowMap::new(4, 4);
        main.merge_tile(&tile, 2, 2);
        main.initialize();

        assert_eq!(main.sample(2, 2, 10.0), 0.0);
        assert_eq!(main.sample(0, 0, 10.0), 1.0);
    }

    #[test]
    fn compression_keeps_within_epsilon_of_original() {
        let mut f = VisibilityFunction::default();
        for i in 1..20 {
            f.add(i as f32, 0.02);
        }
        let mut uncompressed = f.clone();
        uncompressed.initialize(0.0001);
        let mut compressed = f.clone();
        compressed.initialize(0.05);

        assert!(compressed.points().len() <= uncompressed.points().len());

        for z in [2.0, 5.0, 10.0, 15.0] {
            let a = uncompressed.sample(z, 0.0);
            let b = compressed.sample(z, 0.0);
            assert!((a - b).abs() < 0.2, "z={z} diverged too much: {a} vs {b}");
        }
    }
}
