//! The tiled triangle rasterizer: screen-space binning, the
//! lane-parallel edge-function inner loop, and the worker pool that
//! drains tiles across threads.

pub mod fragment;
pub mod pool;
pub mod tile;

pub use self::fragment::{ColorBlinnPhong, ColorCtx, DepthOnly, DepthOnlyCtx, FragmentProcessor, ShadowCtx, ShadowDsm};
pub use self::tile::{TileGrid, TILE_SIZE};

use crate::geometry::{edge_function, is_top_left_edge, Triangle};

/// Pixels processed per inner-loop step. A compile-time constant sized
/// to a typical SIMD float register width, so the auto-vectorizer can
/// pack the coverage test and attribute math into real SIMD
/// instructions without an explicit intrinsics dependency.
pub const LANES: usize = 8;

/// Rasterize one triangle's coverage within `tile_rect` (a pixel-space
/// `(x0, y0, x1, y1)` rectangle, `x1`/`y1` exclusive), calling
/// `P::process` for every covered sample with tile-local pixel
/// coordinates and normalized barycentric weights.
///
/// Triangles with non-positive signed area are back-face culled and
/// produce no calls.
pub fn rasterize_triangle<P, Ctx>(tri: &Triangle, tile_rect: (u32, u32, u32, u32), ctx: &mut Ctx)
where
    P: FragmentProcessor<Ctx>,
{
    let [v0, v1, v2] = &tri.vertices;
    let (ax, ay) = (v0.clip_position.x, v0.clip_position.y);
    let (bx, by) = (v1.clip_position.x, v1.clip_position.y);
    let (cx, cy) = (v2.clip_position.x, v2.clip_position.y);

    let area = edge_function(ax, ay, bx, by, cx, cy);
    if area <= 0.0 {
        return;
    }

    let (min_x, min_y, max_x, max_y) = tri.screen_bounds();
    let (tx0, ty0, tx1, ty1) = tile_rect;

    let x_start = (min_x.floor() as i64).max(tx0 as i64);
    let x_end = (max_x.ceil() as i64).min(tx1 as i64);
    let y_start = (min_y.floor() as i64).max(ty0 as i64);
    let y_end = (max_y.ceil() as i64).min(ty1 as i64);

    if x_start >= x_end || y_start >= y_end {
        return;
    }

    // Edge i is opposite vertex i: w0 = edge(v1, v2, p), w1 = edge(v2, v0, p), w2 = edge(v0, v1, p).
    let top_left_0 = is_top_left_edge(bx, by, cx, cy);
    let top_left_1 = is_top_left_edge(cx, cy, ax, ay);
    let top_left_2 = is_top_left_edge(ax, ay, bx, by);

    let dw0_dx = cy - by;
    let dw1_dx = ay - cy;
    let dw2_dx = by - ay;

    for y in y_start..y_end {
        let py = y as f32 + 0.5;
        let row_x0 = x_start as f32 + 0.5;

        let mut w0_row = edge_function(bx, by, cx, cy, row_x0, py);
        let mut w1_row = edge_function(cx, cy, ax, ay, row_x0, py);
        let mut w2_row = edge_function(ax, ay, bx, by, row_x0, py);

        let mut x = x_start;
        while x < x_end {
            let lanes = LANES.min((x_end - x) as usize);

            let mut w0s = [0.0f32; LANES];
            let mut w1s = [0.0f32; LANES];
            let mut w2s = [0.0f32; LANES];
            let mut covered = [false; LANES];

            for lane in 0..lanes {
                let offset = lane as f32;
                let w0 = w0_row + dw0_dx * offset;
                let w1 = w1_row + dw1_dx * offset;
                let w2 = w2_row + dw2_dx * offset;

                w0s[lane] = w0;
                w1s[lane] = w1;
                w2s[lane] = w2;

                let in0 = w0 > 0.0 || (w0 == 0.0 && top_left_0);
                let in1 = w1 > 0.0 || (w1 == 0.0 && top_left_1);
                let in2 = w2 > 0.0 || (w2 == 0.0 && top_left_2);
                covered[lane] = in0 && in1 && in2;
            }

            for lane in 0..lanes {
                if !covered[lane] {
                    continue;
                }

                let fw0 = w0s[lane] / area;
                let fw1 = w1s[lane] / area;
                let fw2 = w2s[lane] / area;
                let z = fw0 * v0.clip_position.z + fw1 * v1.clip_position.z + fw2 * v2.clip_position.z;

                let px = (x as u32) + lane as u32;
                let py_u = y as u32;

                P::process(ctx, px - tx0, py_u - ty0, z, tri, [fw0, fw1, fw2]);
            }

            w0_row += dw0_dx * lanes as f32;
            w1_row += dw1_dx * lanes as f32;
            w2_row += dw2_dx * lanes as f32;
            x += lanes as i64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vertex;
    use crate::math::{Vec2, Vec3, Vec4};

    fn screen_vertex(x: f32, y: f32, z: f32) -> Vertex {
        Vertex::pre_clip_init(Vec4::new(x, y, z, 1.0), Vec4::new(x, y, z, 1.0), Vec3::new(0.0, 0.0, 1.0), Vec2::new(0.0, 0.0), Vec4::new(1.0, 1.0, 1.0, 1.0))
    }

    #[test]
    fn covers_center_pixel_of_large_triangle() {
        // Front-facing winding: (c.x-a.x)(b.y-a.y) - (c.y-a.y)(b.x-a.x) > 0.
        let tri = Triangle::new(screen_vertex(0.0, 0.0, 0.5), screen_vertex(0.0, 100.0, 0.5), screen_vertex(100.0, 0.0, 0.5));

        let mut depth = vec![f32::INFINITY; 100 * 100];
        let mut ctx = DepthOnlyCtx { depth: &mut depth, width: 100 };
        rasterize_triangle::<DepthOnly, _>(&tri, (0, 0, 100, 100), &mut ctx);

        assert!(depth[50 * 100 + 10] < f32::INFINITY, "expected interior pixel to be covered");
        assert_eq!(depth[99 * 100 + 99], f32::INFINITY, "expected far corner to be outside the triangle");
    }

    #[test]
    fn back_facing_triangle_is_culled() {
        // Reversed winding relative to the covering test above.
        let tri = Triangle::new(screen_vertex(0.0, 0.0, 0.5), screen_vertex(100.0, 0.0, 0.5), screen_vertex(0.0, 100.0, 0.5));

        let mut depth = vec![f32::INFINITY; 100 * 100];
        let mut ctx = DepthOnlyCtx { depth: &mut depth, width: 100 };
        rasterize_triangle::<DepthOnly, _>(&tri, (0, 0, 100, 100), &mut ctx);

        assert!(depth.iter().all(|&d| d == f32::INFINITY));
    }

    #[test]
    fn shared_edge_between_two_triangles_is_not_double_covered() {
        // Two triangles sharing the diagonal edge of a unit square, both
        // with consistent front-facing winding; a pixel exactly on the
        // diagonal must be claimed by exactly one.
        let square_a = Triangle::new(screen_vertex(0.0, 0.0, 0.5), screen_vertex(0.0, 10.0, 0.5), screen_vertex(10.0, 10.0, 0.5));
        let square_b = Triangle::new(screen_vertex(0.0, 0.0, 0.5), screen_vertex(10.0, 10.0, 0.5), screen_vertex(10.0, 0.0, 0.5));

        let mut hits = vec![0u32; 10 * 10];

        struct CountCtx<'a> {
            hits: &'a mut [u32],
            width: u32,
        }
        struct Counter;
        impl FragmentProcessor<CountCtx<'_>> for Counter {
            fn process(ctx: &mut CountCtx<'_>, local_x: u32, local_y: u32, _z: f32, _tri: &Triangle, _fw: [f32; 3]) {
                ctx.hits[(local_y * ctx.width + local_x) as usize] += 1;
            }
        }

        let mut ctx = CountCtx { hits: &mut hits, width: 10 };
        rasterize_triangle::<Counter, _>(&square_a, (0, 0, 10, 10), &mut ctx);
        rasterize_triangle::<Counter, _>(&square_b, (0, 0, 10, 10), &mut ctx);

        assert!(hits.iter().all(|&h| h <= 1), "a pixel was covered by both triangles sharing the diagonal");
        assert!(hits.iter().any(|&h| h == 1), "expected at least some pixels covered");
    }
}
