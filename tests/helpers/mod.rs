//! Shared fixtures for integration tests

#![allow(dead_code)]

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deterministic RNG for reproducible fixtures
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Patch with every pixel set to `value`
pub fn constant_patch(n: usize, value: f64) -> DVector<f64> {
    DVector::from_element(n, value)
}

/// Row-major patch spanning `[lo, lo + range]` along x
pub fn horizontal_ramp(resx: usize, resy: usize, lo: f64, range: f64) -> DVector<f64> {
    let denom = (resx.max(2) - 1) as f64;
    DVector::from_fn(resx * resy, |i, _| lo + range * (i % resx) as f64 / denom)
}

/// Random orthonormal `dim x k` matrix
pub fn random_orthonormal(rng: &mut StdRng, dim: usize, k: usize) -> DMatrix<f64> {
    let raw = DMatrix::from_fn(dim, k, |_, _| rng.gen_range(-1.0..1.0));
    raw.qr().q()
}

/// `mean + basis * c` with each coefficient uniform in `[-scale, scale]`
pub fn sample_in_span(
    rng: &mut StdRng,
    mean: &DVector<f64>,
    basis: &DMatrix<f64>,
    scale: f64,
) -> DVector<f64> {
    let coeffs = DVector::from_fn(basis.ncols(), |_, _| rng.gen_range(-scale..scale));
    mean + basis * coeffs
}

/// Assert two floats agree within `tol`
pub fn assert_close(actual: f64, expected: f64, tol: f64, what: &str) {
    assert!(
        (actual - expected).abs() <= tol,
        "{}: expected {}, got {} (tol {})",
        what,
        expected,
        actual,
        tol
    );
}
