//! Sequential Karhunen-Loeve transform with mean update (SKLM)
//!
//! Merges an existing eigenbasis with a batch of new observations without
//! revisiting older data:
//!
//! ```text
//! mu_C = (ff*n*mu_A + m*mu_B) / (ff*n + m)
//! A    = [ U * diag(sigma) * sqrt(ff*n / (ff*n + m)),
//!          B - mu_B,
//!          sqrt(ff*n*m / (ff*n + m)) * (mu_A - mu_B) ]
//! A    = Q R,   R = U_R S V_R^T
//! U'   = Q U_R,  sigma' = diag(S),  truncated to max_n_eig
//! n'   = ff*n + m
//! ```
//!
//! Cost is linear in the patch dimension and independent of how many
//! observations have been absorbed.

use nalgebra::{DMatrix, DVector};

use crate::common::constants::SIGMA_TOLERANCE;
use crate::common::errors::{ensure_len, AppearanceError, Result};
use crate::common::linalg::{ordered_left_svd, thin_qr};

/// Eigenbasis state produced by one SKLM step
#[derive(Debug, Clone)]
pub struct SklmOutput {
    /// Orthonormal basis, `dim x k`
    pub basis: DMatrix<f64>,
    /// Singular values, descending, length `k`
    pub sigma: DVector<f64>,
    /// Combined running mean
    pub mean: DVector<f64>,
    /// Effective number of absorbed observations, `ff*n + m`
    pub n_observations: f64,
}

/// Run one SKLM step.
///
/// # Arguments
/// * `basis` - current basis `U` (`dim x k`, may have zero columns)
/// * `sigma` - singular values aligned with `basis`
/// * `mean` - running mean `mu_A`
/// * `batch` - new raw observations `B` (`dim x m`, `m >= 1`)
/// * `n_prev` - observations absorbed so far
/// * `forgetting_factor` - weight `ff` in `(0, 1]` applied to the past
/// * `max_n_eig` - rank cap
///
/// # Returns
/// The merged state; components whose singular value is numerically zero
/// are dropped along with the truncated tail.
pub fn sklm(
    basis: &DMatrix<f64>,
    sigma: &DVector<f64>,
    mean: &DVector<f64>,
    batch: &DMatrix<f64>,
    n_prev: f64,
    forgetting_factor: f64,
    max_n_eig: usize,
) -> Result<SklmOutput> {
    let dim = mean.len();
    let k = basis.ncols();
    let m = batch.ncols();
    ensure_len(dim, batch.nrows(), "batch rows")?;
    ensure_len(k, sigma.len(), "singular values")?;
    if k > 0 {
        ensure_len(dim, basis.nrows(), "basis rows")?;
    }
    if m == 0 {
        return Err(AppearanceError::config("SKLM needs at least one observation"));
    }

    let m_f = m as f64;
    let ffn = forgetting_factor * n_prev;
    let total = ffn + m_f;

    let batch_mean = batch.column_mean();
    let combined_mean = (mean * ffn + &batch_mean * m_f) / total;

    let mut augmented = DMatrix::zeros(dim, k + m + 1);
    let basis_scale = (ffn / total).sqrt();
    for j in 0..k {
        augmented
            .column_mut(j)
            .copy_from(&(basis.column(j) * (sigma[j] * basis_scale)));
    }
    for j in 0..m {
        augmented
            .column_mut(k + j)
            .copy_from(&(batch.column(j) - &batch_mean));
    }
    let shift_scale = (ffn * m_f / total).sqrt();
    augmented
        .column_mut(k + m)
        .copy_from(&((mean - &batch_mean) * shift_scale));

    let (q, r) = thin_qr(augmented);
    let (u_r, s) = ordered_left_svd(r);

    let floor = s.iter().next().map_or(0.0, |&s0| s0 * SIGMA_TOLERANCE);
    let keep = s
        .iter()
        .take(max_n_eig)
        .take_while(|&&v| v > floor && v > 0.0)
        .count();

    let new_basis = q * u_r.columns(0, keep);
    let new_sigma = s.rows(0, keep).into_owned();

    Ok(SklmOutput {
        basis: new_basis,
        sigma: new_sigma,
        mean: combined_mean,
        n_observations: total,
    })
}
