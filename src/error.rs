//! Construction-time error types.
//!
//! Nothing in the per-frame hot path returns a `Result`: degenerate
//! geometry, out-of-range shadow writes and similar domain-valid
//! outcomes are encoded as sentinel values instead (see the modules
//! that produce them). Only object construction can fail outright.

use thiserror::Error;

/// Errors raised while constructing pipeline objects.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum PipelineError {
    #[error("framebuffer dimensions must be positive, got {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },

    #[error("shadow map dimensions must be at least 1x1, got {width}x{height}")]
    InvalidShadowMapDimensions { width: i64, height: i64 },

    #[error("field of view must be positive and less than a full turn, got {fov_deg} degrees")]
    InvalidFov { fov_deg: f32 },

    #[error("near plane ({near}) must be less than far plane ({far})")]
    InvalidNearFar { near: f32, far: f32 },

    #[error("near plane ({near}) must be positive")]
    NonPositiveNear { near: f32 },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
