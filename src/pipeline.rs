//! Top-level orchestration: the public `Pipeline` that owns the
//! framebuffer, worker pool, and per-light shadow maps, and runs one
//! frame's shadow pass, geometry prep, optional depth pre-pass, and
//! opaque/transparent color passes.

use std::sync::Arc;

use rayon::prelude::*;

use crate::color::Rgba8;
use crate::dsm::DeepShadowMap;
use crate::error::{PipelineError, PipelineResult};
use crate::geometry::{clip_triangle, fan_triangulate, Triangle, Vertex};
use crate::light::{LightUniform, PerspectiveLight};
use crate::math::{Mat4, Vec3, Vec4};
use crate::mesh::Mesh;
use crate::raster::fragment::{ColorCtx, DepthOnlyCtx, ShadowCtx};
use crate::raster::pool::{with_tile_scratch, WorkerPool};
use crate::raster::tile::TileGrid;
use crate::raster::{rasterize_triangle, ColorBlinnPhong, DepthOnly, ShadowDsm};
use crate::scene::Scene;
use crate::shading::MaterialParams;
use crate::texture::Texture;
use crate::transform::Perspective;

/// A batch of screen-space triangles sharing one optional texture
/// (one mesh's worth, since a mesh carries a single texture).
struct Batch {
    texture: Option<Arc<Texture>>,
    is_opaque: bool,
    triangles: Vec<Triangle>,
    avg_z: f32,
}

/// Triangle count above which the depth pre-pass runs even with no
/// active lights, on the theory that eager depth rejection pays for
/// itself once there's enough geometry.
const DEPTH_PREPASS_TRIANGLE_THRESHOLD: usize = 4096;

pub struct Pipeline {
    width: u32,
    height: u32,
    framebuffer: Vec<Rgba8>,
    depth: Vec<f32>,
    lights: Vec<PerspectiveLight>,
    shadow_maps: Vec<DeepShadowMap>,
    material: MaterialParams,
    tile_grid: TileGrid,
    pool: WorkerPool,
    output: Vec<u8>,
}

impl Pipeline {
    pub fn new(width: u32, height: u32, lights: Vec<PerspectiveLight>) -> PipelineResult<Pipeline> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidDimensions { width: width as i64, height: height as i64 });
        }

        let shadow_maps = lights.iter().map(|l| DeepShadowMap::new(l.width(), l.height())).collect();

        Ok(Pipeline {
            width,
            height,
            framebuffer: vec![Rgba8::BLACK; (width * height) as usize],
            depth: vec![f32::INFINITY; (width * height) as usize],
            lights,
            shadow_maps,
            material: MaterialParams { ambient_rgb: Vec3::new(0.05, 0.05, 0.05), specular_strength: 0.5, shininess: 32.0 },
            tile_grid: TileGrid::new(width, height),
            pool: WorkerPool::new(),
            output: vec![0u8; (width * height * 4) as usize],
        })
    }

    pub fn set_material_params(&mut self, specular_strength: f32, shininess: f32) {
        self.material.specular_strength = specular_strength;
        self.material.shininess = shininess;
    }

    pub fn lights(&self) -> &[PerspectiveLight] {
        &self.lights
    }

    pub fn lights_mut(&mut self) -> &mut [PerspectiveLight] {
        &mut self.lights
    }

    /// Render one frame and return the framebuffer as row-major RGBA8 bytes.
    pub fn render(&mut self, scene: &Scene) -> &[u8] {
        log::trace!("frame start: {} meshes, {} lights", scene.meshes.len(), self.lights.len());

        self.material.ambient_rgb = scene.ambient_rgb;

        self.shadow_pass(scene);
        let (opaque, transparent) = self.geometry_pass(scene);

        for pixel in &mut self.framebuffer {
            *pixel = scene.background_rgba;
        }
        for d in &mut self.depth {
            *d = f32::INFINITY;
        }

        let total_opaque_triangles: usize = opaque.iter().map(|b| b.triangles.len()).sum();
        let run_depth_prepass = !self.lights.is_empty() || total_opaque_triangles > DEPTH_PREPASS_TRIANGLE_THRESHOLD;

        if run_depth_prepass {
            log::trace!("depth pre-pass start: {total_opaque_triangles} opaque triangles");
            self.depth_prepass(&opaque);
            log::trace!("depth pre-pass end");
        }

        log::trace!("color pass start");
        self.color_pass(&opaque, scene.camera.world_position(), false);
        self.color_pass(&transparent, scene.camera.world_position(), true);
        log::trace!("color pass end");

        for (i, pixel) in self.framebuffer.iter().enumerate() {
            let base = i * 4;
            self.output[base] = pixel.r;
            self.output[base + 1] = pixel.g;
            self.output[base + 2] = pixel.b;
            self.output[base + 3] = pixel.a;
        }

        log::trace!("frame end");
        &self.output
    }

    fn shadow_pass(&mut self, scene: &Scene) {
        for light_index in 0..self.lights.len() {
            let light = &self.lights[light_index];
            let light_w2c = light.world_to_clip();
            let light_w = light.width();
            let light_h = light.height();

            let mut grid = TileGrid::new(light_w, light_h);
            let mut triangles = Vec::new();
            let mut textures: Vec<Option<Arc<Texture>>> = Vec::new();

            for mesh in &scene.meshes {
                let screen = prepare_mesh_triangles(mesh, &light_w2c, light_w, light_h, None);
                if screen.is_empty() {
                    continue;
                }
                let batch_index = textures.len() as u32;
                textures.push(mesh.texture.clone());
                for tri in screen {
                    let idx = triangles.len() as u32;
                    let bounds = tri.screen_bounds();
                    grid.bin(idx, bounds);
                    triangles.push((tri, batch_index));
                }
            }

            let mut main_shadow = DeepShadowMap::new(light_w, light_h);

            let tile_count = grid.tile_count();
            let grid_ref = &grid;
            let triangles_ref = &triangles;
            let textures_ref = &textures;

            let tile_results: Vec<(u32, u32, DeepShadowMap)> = self.pool.install(|| {
                (0..tile_count)
                    .into_par_iter()
                    .map(|tile_index| {
                        let (x0, y0, x1, y1) = grid_ref.tile_rect(tile_index);
                        with_tile_scratch(|scratch| {
                            scratch.shadow = DeepShadowMap::new(x1 - x0, y1 - y0);
                            for &tri_idx in grid_ref.triangles_in(tile_index) {
                                let (tri, batch_index) = &triangles_ref[tri_idx as usize];
                                let texture = textures_ref[*batch_index as usize].as_deref();
                                let mut ctx = ShadowCtx { dsm: &mut scratch.shadow, texture };
                                rasterize_triangle::<ShadowDsm, _>(tri, (x0, y0, x1, y1), &mut ctx);
                            }
                            (x0, y0, std::mem::replace(&mut scratch.shadow, DeepShadowMap::new(crate::raster::TILE_SIZE, crate::raster::TILE_SIZE)))
                        })
                    })
                    .collect()
            });

            for (x0, y0, tile_dsm) in tile_results {
                main_shadow.merge_tile(&tile_dsm, x0, y0);
            }
            main_shadow.initialize();
            self.shadow_maps[light_index] = main_shadow;
        }
    }

    /// Build screen-space triangle batches for the main camera pass,
    /// partitioned into opaque (front-to-back by average z) and
    /// transparent (back-to-front) batch lists.
    fn geometry_pass(&self, scene: &Scene) -> (Vec<Batch>, Vec<Batch>) {
        let world_to_clip = scene.camera.world_to_clip();
        let width = scene.camera.width();
        let height = scene.camera.height();

        let mut opaque = Vec::new();
        let mut transparent = Vec::new();

        for mesh in &scene.meshes {
            let triangles = prepare_mesh_triangles(mesh, &world_to_clip, width, height, Some(&self.lights));

            if triangles.is_empty() {
                log::warn!("mesh contributed zero triangles after clipping (fully outside the view frustum)");
                continue;
            }

            let avg_z: f32 = triangles.iter().map(|t| (t.vertices[0].clip_position.z + t.vertices[1].clip_position.z + t.vertices[2].clip_position.z) / 3.0).sum::<f32>() / triangles.len() as f32;

            let batch = Batch { texture: mesh.texture.clone(), is_opaque: mesh.is_opaque(), triangles, avg_z };

            if batch.is_opaque {
                opaque.push(batch);
            } else {
                transparent.push(batch);
            }
        }

        opaque.sort_by(|a, b| a.avg_z.partial_cmp(&b.avg_z).unwrap());
        transparent.sort_by(|a, b| b.avg_z.partial_cmp(&a.avg_z).unwrap());

        (opaque, transparent)
    }

    fn depth_prepass(&mut self, opaque: &[Batch]) {
        let triangles = self.bin_batches(opaque);
        let grid = &self.tile_grid;
        let tile_count = grid.tile_count();
        let width = self.width;

        let results: Vec<(u32, u32, u32, u32, Vec<f32>)> = self.pool.install(|| {
            (0..tile_count)
                .into_par_iter()
                .map(|tile_index| {
                    let (x0, y0, x1, y1) = grid.tile_rect(tile_index);
                    let tile_w = x1 - x0;
                    let tile_h = y1 - y0;
                    with_tile_scratch(|scratch| {
                        for d in scratch.depth.iter_mut().take((tile_w * tile_h) as usize) {
                            *d = f32::INFINITY;
                        }
                        for &tri_idx in grid.triangles_in(tile_index) {
                            let tri = &triangles[tri_idx as usize];
                            let mut ctx = DepthOnlyCtx { depth: &mut scratch.depth, width: tile_w };
                            rasterize_triangle::<DepthOnly, _>(tri, (x0, y0, x1, y1), &mut ctx);
                        }
                        (x0, y0, tile_w, tile_h, scratch.depth[..(tile_w * tile_h) as usize].to_vec())
                    })
                })
                .collect()
        });

        for (x0, y0, tile_w, tile_h, tile_depth) in results {
            for ly in 0..tile_h {
                for lx in 0..tile_w {
                    let tile_idx = (ly * tile_w + lx) as usize;
                    let main_idx = ((y0 + ly) * width + (x0 + lx)) as usize;
                    if tile_depth[tile_idx] < self.depth[main_idx] {
                        self.depth[main_idx] = tile_depth[tile_idx];
                    }
                }
            }
        }
    }

    /// Rasterize `batches` into the main framebuffer/depth buffer.
    ///
    /// `blend_with_main` distinguishes the transparent pass from the
    /// opaque one: a transparent fragment's `src_over` blend and depth
    /// test must read the color the opaque pass (and the background
    /// clear) already wrote, not a blank per-tile buffer, or blending
    /// would silently discard whatever is already behind it. The
    /// opaque pass has no such dependency on color — every opaque
    /// pixel it covers is fully overwritten — so its tile starts with
    /// blank color and only the pixels it actually touches are copied
    /// back. Depth, unlike color, is seeded from the main buffer for
    /// both passes: the opaque pass needs to see whatever the depth
    /// pre-pass already resolved so its early-z rejection has an
    /// effect, and the transparent pass needs it for the same reason
    /// the color case does.
    fn color_pass(&mut self, batches: &[Batch], camera_position: Vec3, blend_with_main: bool) {
        let (triangles, batch_of_triangle) = self.bin_batches_with_texture(batches);
        let grid = &self.tile_grid;
        let tile_count = grid.tile_count();
        let width = self.width;
        // Snapshot once per pass: `PerspectiveLight` holds its transform
        // behind an `Rc` so it can be linked to a camera, which makes it
        // `!Sync` and unusable from the tile worker pool directly.
        let light_snapshots: Vec<LightUniform> = self.lights.iter().map(|l| l.snapshot()).collect();
        let lights = &light_snapshots;
        let shadow_maps = &self.shadow_maps;
        let material = &self.material;
        let main_color = &self.framebuffer;
        let main_depth = &self.depth;

        let results: Vec<(u32, u32, u32, u32, Vec<Rgba8>, Vec<f32>, Vec<bool>)> = self.pool.install(|| {
            (0..tile_count)
                .into_par_iter()
                .map(|tile_index| {
                    let (x0, y0, x1, y1) = grid.tile_rect(tile_index);
                    let tile_w = x1 - x0;
                    let tile_h = y1 - y0;
                    let n = (tile_w * tile_h) as usize;

                    let mut color = vec![Rgba8::TRANSPARENT; n];
                    let mut depth = vec![f32::INFINITY; n];
                    let mut touched = vec![false; n];

                    // Depth is seeded from the main buffer regardless of
                    // `blend_with_main`: the opaque pass relies on this to
                    // make the depth pre-pass's early rejection effective
                    // (otherwise every tile would restart from infinity
                    // and redo the work the pre-pass already did). Color
                    // is only seeded for the transparent pass, which needs
                    // to blend onto what's already there.
                    for ly in 0..tile_h {
                        for lx in 0..tile_w {
                            let tile_idx = (ly * tile_w + lx) as usize;
                            let main_idx = ((y0 + ly) * width + (x0 + lx)) as usize;
                            if blend_with_main {
                                color[tile_idx] = main_color[main_idx];
                            }
                            depth[tile_idx] = main_depth[main_idx];
                        }
                    }

                    for &tri_idx in grid.triangles_in(tile_index) {
                        let tri = &triangles[tri_idx as usize];
                        let batch_idx = batch_of_triangle[tri_idx as usize];
                        let texture = batches[batch_idx].texture.as_deref();

                        let mut ctx = ColorCtxWithTouched {
                            inner: ColorCtx { color: &mut color, depth: &mut depth, width: tile_w, texture, lights, shadow_maps, camera_position, material },
                            touched: &mut touched,
                        };
                        rasterize_triangle::<TouchedColorBlinnPhong, _>(tri, (x0, y0, x1, y1), &mut ctx);
                    }

                    (x0, y0, tile_w, tile_h, color, depth, touched)
                })
                .collect()
        });

        for (x0, y0, tile_w, tile_h, color, depth, touched) in results {
            for ly in 0..tile_h {
                for lx in 0..tile_w {
                    let tile_idx = (ly * tile_w + lx) as usize;
                    if !touched[tile_idx] && !blend_with_main {
                        continue;
                    }
                    let main_idx = ((y0 + ly) * width + (x0 + lx)) as usize;
                    self.framebuffer[main_idx] = color[tile_idx];
                    if depth[tile_idx] < self.depth[main_idx] {
                        self.depth[main_idx] = depth[tile_idx];
                    }
                }
            }
        }
    }

    /// Clear and rebin `self.tile_grid` with `batches`' triangles,
    /// reusing its pre-allocated per-tile `Vec`s rather than
    /// reallocating a grid every frame.
    fn bin_batches(&mut self, batches: &[Batch]) -> Vec<Triangle> {
        self.tile_grid.clear();
        let mut triangles = Vec::new();
        for batch in batches {
            for tri in &batch.triangles {
                let idx = triangles.len() as u32;
                self.tile_grid.bin(idx, tri.screen_bounds());
                triangles.push(tri.clone());
            }
        }
        triangles
    }

    fn bin_batches_with_texture(&mut self, batches: &[Batch]) -> (Vec<Triangle>, Vec<usize>) {
        self.tile_grid.clear();
        let mut triangles = Vec::new();
        let mut batch_of_triangle = Vec::new();
        for (batch_idx, batch) in batches.iter().enumerate() {
            for tri in &batch.triangles {
                let idx = triangles.len() as u32;
                self.tile_grid.bin(idx, tri.screen_bounds());
                triangles.push(tri.clone());
                batch_of_triangle.push(batch_idx);
            }
        }
        (triangles, batch_of_triangle)
    }
}

/// `Triangle` needs `Clone` for the binning helpers above; vertices are
/// small and this only runs once per frame per triangle.
impl Clone for Triangle {
    fn clone(&self) -> Self {
        Triangle { vertices: self.vertices.clone() }
    }
}

struct ColorCtxWithTouched<'a> {
    inner: ColorCtx<'a>,
    touched: &'a mut [bool],
}

struct TouchedColorBlinnPhong;

impl crate::raster::FragmentProcessor<ColorCtxWithTouched<'_>> for TouchedColorBlinnPhong {
    fn process(ctx: &mut ColorCtxWithTouched<'_>, local_x: u32, local_y: u32, z: f32, tri: &Triangle, fw: [f32; 3]) {
        let idx = (local_y * ctx.inner.width + local_x) as usize;
        // Only mark a pixel touched if this fragment actually passes the
        // depth test `ColorBlinnPhong::process` is about to run; otherwise
        // a tile seeded from a pre-populated main depth buffer would be
        // flagged touched (and copied back) for samples it never wrote.
        if z <= ctx.inner.depth[idx] {
            ctx.touched[idx] = true;
        }
        ColorBlinnPhong::process(&mut ctx.inner, local_x, local_y, z, tri, fw);
    }
}

fn transform_normal_matrix(model: &Mat4) -> Mat4 {
    let linear = model.fixed_view::<3, 3>(0, 0).into_owned();
    let inv = linear.try_inverse().unwrap_or_else(nalgebra::Matrix3::identity);
    inv.transpose().to_homogeneous()
}

/// Build clipped, perspective-divided, viewport-transformed triangles
/// for one mesh against one `world_to_clip` matrix (camera or light).
/// When `lights` is `Some`, attaches each clipped vertex's per-light
/// clip-space position (camera pass only; the shadow pass skips this).
fn prepare_mesh_triangles(mesh: &Mesh, world_to_clip: &Mat4, width: u32, height: u32, lights: Option<&[PerspectiveLight]>) -> Vec<Triangle> {
    // `model_matrix`/`world_aabb` take `&mut self` to cache; the cache is
    // per-mesh and frame-stable, but `Scene::meshes` is read-only here,
    // so recompute the model matrix directly instead of caching.
    let model = mesh.transform_model_matrix();
    let normal_matrix = transform_normal_matrix(&model);

    let mut out = Vec::new();

    for [i0, i1, i2] in mesh.triangle_indices() {
        let verts = [i0, i1, i2].map(|i| {
            let mv = &mesh.vertices()[i as usize];
            let world4 = model * Vec4::new(mv.position.x, mv.position.y, mv.position.z, 1.0);
            let clip4 = world_to_clip * world4;
            let world_normal = (normal_matrix.fixed_view::<3, 3>(0, 0) * mv.normal).normalize();
            Vertex::pre_clip_init(world4, clip4, world_normal, mv.uv, mv.color)
        });

        let polygon = clip_triangle(verts[0].clone(), verts[1].clone(), verts[2].clone());
        if polygon.is_empty() {
            continue;
        }

        for mut tri_verts in fan_triangulate(&polygon) {
            for v in &mut tri_verts {
                if let Some(lights) = lights {
                    for light in lights {
                        let light_clip = light.world_to_clip() * v.world_position;
                        v.light_clip_over_w.push(light_clip * v.inv_w);
                    }
                }
                perspective_divide_and_viewport(v, width, height);
            }
            out.push(Triangle::new(tri_verts[0].clone(), tri_verts[1].clone(), tri_verts[2].clone()));
        }
    }

    out
}

fn perspective_divide_and_viewport(v: &mut Vertex, width: u32, height: u32) {
    let w = v.clip_position.w;
    let ndc_x = v.clip_position.x / w;
    let ndc_y = v.clip_position.y / w;
    let ndc_z = v.clip_position.z / w;

    let sx = (ndc_x + 1.0) * 0.5 * width as f32;
    let sy = (1.0 - ndc_y) * 0.5 * height as f32;

    v.clip_position = Vec4::new(sx, sy, ndc_z, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    /// A screen-space triangle covering an entire `TILE_SIZE`x`TILE_SIZE`
    /// tile at a flat depth `z`, with a uniform vertex color. `w = 1` and
    /// `inv_w = 1` throughout, so perspective-correct recovery is a no-op
    /// (these tests exercise tile compositing, not the geometry pipeline).
    fn full_tile_triangle(z: f32, color: Vec4) -> Triangle {
        let vert = |x: f32, y: f32| {
            Vertex::pre_clip_init(Vec4::new(x, y, 0.0, 1.0), Vec4::new(x, y, z, 1.0), Vec3::new(0.0, 0.0, 1.0), Vec2::new(0.0, 0.0), color)
        };
        let side = (crate::raster::TILE_SIZE * 2) as f32;
        Triangle::new(vert(0.0, 0.0), vert(0.0, side), vert(side, 0.0))
    }

    fn single_tile_pipeline() -> Pipeline {
        let size = crate::raster::TILE_SIZE;
        let mut pipeline = Pipeline::new(size, size, Vec::new()).unwrap();
        pipeline.material.ambient_rgb = Vec3::zeros();
        pipeline
    }

    fn opaque_batch(z: f32, color: Vec4) -> Batch {
        Batch { texture: None, is_opaque: true, triangles: vec![full_tile_triangle(z, color)], avg_z: z }
    }

    fn transparent_batch(z: f32, color: Vec4) -> Batch {
        Batch { texture: None, is_opaque: false, triangles: vec![full_tile_triangle(z, color)], avg_z: z }
    }

    /// Boundary scenario 4: two opaque quads at different depths produce
    /// the same result (nearest wins) regardless of submission order.
    #[test]
    fn depth_test_picks_nearest_opaque_regardless_of_order() {
        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
        let blue = Vec4::new(0.0, 0.0, 1.0, 1.0);

        for batches in [vec![opaque_batch(0.4, red), opaque_batch(0.6, blue)], vec![opaque_batch(0.6, blue), opaque_batch(0.4, red)]] {
            let mut pipeline = single_tile_pipeline();
            pipeline.color_pass(&batches, Vec3::new(0.0, 0.0, 5.0), false);

            for pixel in &pipeline.framebuffer {
                assert_eq!(*pixel, Rgba8::new(255, 0, 0, 255));
            }
            for &d in &pipeline.depth {
                assert!((d - 0.4).abs() < 1e-5, "expected nearest depth 0.4, got {d}");
            }
        }
    }

    /// Boundary scenario 5: blending a translucent quad over an opaque
    /// black background composites onto the existing color, and leaves
    /// the depth buffer untouched.
    #[test]
    fn alpha_over_blends_onto_existing_background_without_touching_depth() {
        let mut pipeline = single_tile_pipeline();
        for pixel in &mut pipeline.framebuffer {
            *pixel = Rgba8::BLACK;
        }

        let white_alpha_half = Vec4::new(1.0, 1.0, 1.0, 128.0 / 255.0);
        let batches = vec![transparent_batch(0.5, white_alpha_half)];
        pipeline.color_pass(&batches, Vec3::new(0.0, 0.0, 5.0), true);

        for pixel in &pipeline.framebuffer {
            assert!((pixel.r as i32 - 128).abs() <= 1, "expected ~128 red, got {}", pixel.r);
            assert!((pixel.g as i32 - 128).abs() <= 1, "expected ~128 green, got {}", pixel.g);
            assert!((pixel.b as i32 - 128).abs() <= 1, "expected ~128 blue, got {}", pixel.b);
            assert_eq!(pixel.a, 255, "compositing over an opaque background must stay fully opaque");
        }
        for &d in &pipeline.depth {
            assert_eq!(d, f32::INFINITY, "transparent fragments must not write the depth buffer");
        }
    }
}
