//! The frame worker pool.
//!
//! A fixed-size `rayon::ThreadPool` drains the tile queue every frame.
//! `pool.install` gives the blocking-take/countdown-barrier semantics
//! the spec describes (the call returns only once every tile closure
//! has run) and `thread_local!` storage gives each worker a
//! lazily-created, persistent tile-sized scratch buffer, reused frame
//! to frame rather than reallocated.

use std::cell::RefCell;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::color::Rgba8;
use crate::dsm::DeepShadowMap;
use crate::raster::tile::TILE_SIZE;

const TILE_AREA: usize = (TILE_SIZE * TILE_SIZE) as usize;

/// Per-worker scratch reused across tiles and frames: a color/depth
/// buffer pair for the color and depth-only passes, and a shadow map
/// for the shadow pass. Sized once to the maximum a tile can need and
/// left that size for the life of the worker thread.
pub struct TileScratch {
    pub color: Vec<Rgba8>,
    pub depth: Vec<f32>,
    pub shadow: DeepShadowMap,
}

impl TileScratch {
    fn new() -> TileScratch {
        TileScratch {
            color: vec![Rgba8::TRANSPARENT; TILE_AREA],
            depth: vec![f32::INFINITY; TILE_AREA],
            shadow: DeepShadowMap::new(TILE_SIZE, TILE_SIZE),
        }
    }
}

thread_local! {
    static SCRATCH: RefCell<Option<TileScratch>> = RefCell::new(None);
}

/// Run `f` against this worker thread's persistent scratch buffer,
/// creating it on first use. `tile_pixels` must be `<= TILE_AREA`;
/// `f` is responsible for only touching the first `tile_pixels`
/// entries of each buffer.
pub fn with_tile_scratch<R>(f: impl FnOnce(&mut TileScratch) -> R) -> R {
    SCRATCH.with(|cell| {
        let mut slot = cell.borrow_mut();
        let scratch = slot.get_or_insert_with(TileScratch::new);
        f(scratch)
    })
}

/// The process-wide frame worker pool, owned by `Pipeline` and
/// dropped at `Pipeline`'s own destruction (rayon joins its worker
/// threads at that point).
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new() -> WorkerPool {
        WorkerPool::with_threads(num_cpus::get())
    }

    pub fn with_threads(threads: usize) -> WorkerPool {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("deepraster-worker-{i}"))
            .build()
            .expect("failed to build the rasterizer's worker thread pool");

        WorkerPool { pool }
    }

    /// Drain `tile_count` tiles across the pool, calling `f(tile_index)`
    /// for each. Blocks until every tile has been processed.
    pub fn for_each_tile<F>(&self, tile_count: usize, f: F)
    where
        F: Fn(usize) + Sync,
    {
        self.pool.install(|| {
            (0..tile_count).into_par_iter().for_each(|i| f(i));
        });
    }

    /// Run `f` on this pool, returning its result once every spawned
    /// task completes. Used for the per-tile `map`+`collect` passes,
    /// which need each tile's result rather than just a side effect.
    pub fn install<R>(&self, f: impl FnOnce() -> R + Send) -> R
    where
        R: Send,
    {
        self.pool.install(f)
    }
}
