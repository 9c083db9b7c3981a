//! Numerical constants and documented defaults
//!
//! Tolerances here are fixed by the algorithms; everything a caller may want
//! to tune lives in the configuration records instead.

/// Relative cutoff below which a singular value is treated as zero.
///
/// Components at or below `SIGMA_TOLERANCE * max(sigma)` carry no variance
/// and their directions are arbitrary, so SKLM drops them after truncation.
pub const SIGMA_TOLERANCE: f64 = 1e-10;

/// Tolerance used when checking `U^T U = I`.
pub const ORTHONORMALITY_TOLERANCE: f64 = 1e-8;

/// Default pixel-difference threshold, as a multiple of the reference
/// patch's dynamic range.
pub const DEFAULT_PIX_DIFF_THRESHOLD: f64 = 10.0;

/// Default gradient-magnitude threshold.
pub const DEFAULT_GRAD_THRESHOLD: f64 = 0.005;

/// Default maximum number of corners kept by the good-features detector.
pub const DEFAULT_GFTT_MAX_CORNERS: usize = 25;

/// Default quality level, relative to the strongest corner response.
pub const DEFAULT_GFTT_QUALITY_LEVEL: f64 = 0.01;

/// Default minimum Euclidean distance between accepted corners, in pixels.
pub const DEFAULT_GFTT_MIN_DISTANCE: f64 = 1.0;

/// Default structure-tensor window size (pixels per side).
pub const DEFAULT_GFTT_BLOCK_SIZE: usize = 3;

/// Default Harris free parameter.
pub const DEFAULT_GFTT_HARRIS_K: f64 = 0.04;

/// Default number of eigenvectors retained by the subspace.
pub const DEFAULT_N_EIGENVEC: usize = 16;

/// Default number of observations buffered between basis updates.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Default forgetting factor applied to past observations.
pub const DEFAULT_FORGETTING_FACTOR: f64 = 0.95;

/// Default scale applied to the mean squared residual before `exp(-x)`.
pub const DEFAULT_LIKELIHOOD_ALPHA: f64 = 1.0;

/// Similarity reported while no basis is available yet.
pub const MAX_SIMILARITY: f64 = 1.0;
