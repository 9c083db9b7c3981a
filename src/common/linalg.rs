//! Linear algebra utilities
//!
//! Thin wrappers around nalgebra's decompositions that fix the conventions
//! the subspace update depends on: economy-size QR and an SVD whose singular
//! values come back in descending order.

use nalgebra::{DMatrix, DVector};

/// Economy-size QR decomposition.
///
/// For an `r x c` input returns `Q` (`r x min(r, c)`, orthonormal columns)
/// and `R` (`min(r, c) x c`, upper triangular) with `A = Q R`.
pub fn thin_qr(matrix: DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
    let qr = matrix.qr();
    (qr.q(), qr.r())
}

/// Singular value decomposition with left vectors only, sorted descending.
///
/// # Returns
/// `(U, sigma)` where the columns of `U` are the left singular vectors,
/// aligned with `sigma[i]`, and `sigma` is non-increasing.
pub fn ordered_left_svd(matrix: DMatrix<f64>) -> (DMatrix<f64>, DVector<f64>) {
    let nrows = matrix.nrows();
    let svd = matrix.svd(true, false);
    let u = match svd.u {
        Some(u) => u,
        None => return (DMatrix::zeros(nrows, 0), DVector::zeros(0)),
    };
    let sigma = svd.singular_values;

    let mut order: Vec<usize> = (0..sigma.len()).collect();
    order.sort_by(|&a, &b| {
        sigma[b]
            .partial_cmp(&sigma[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let sorted_u = u.select_columns(order.iter());
    let sorted_sigma = DVector::from_iterator(order.len(), order.iter().map(|&i| sigma[i]));
    (sorted_u, sorted_sigma)
}

/// Largest absolute deviation of `U^T U` from the identity.
///
/// Returns 0 for a basis with no columns.
pub fn orthonormality_error(basis: &DMatrix<f64>) -> f64 {
    let k = basis.ncols();
    if k == 0 {
        return 0.0;
    }
    let gram = basis.transpose() * basis;
    let mut worst = 0.0f64;
    for i in 0..k {
        for j in 0..k {
            let target = if i == j { 1.0 } else { 0.0 };
            worst = worst.max((gram[(i, j)] - target).abs());
        }
    }
    worst
}

/// Check that the columns of `basis` are orthonormal within `tolerance`
pub fn is_orthonormal(basis: &DMatrix<f64>, tolerance: f64) -> bool {
    orthonormality_error(basis) <= tolerance
}

/// Check that a vector is sorted in non-increasing order
pub fn is_descending(values: &DVector<f64>) -> bool {
    values.as_slice().windows(2).all(|w| w[0] >= w[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thin_qr_reconstructs() {
        #[rustfmt::skip]
        let a = DMatrix::from_row_slice(4, 2, &[
            1.0, 2.0,
            3.0, 4.0,
            5.0, 6.0,
            7.0, 9.0,
        ]);
        let (q, r) = thin_qr(a.clone());
        assert_eq!(q.shape(), (4, 2));
        assert_eq!(r.shape(), (2, 2));
        assert!(is_orthonormal(&q, 1e-12));
        assert!((&q * &r - &a).abs().max() < 1e-12);
    }

    #[test]
    fn test_ordered_svd_descending() {
        let a = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 5.0, 3.0]));
        let (u, sigma) = ordered_left_svd(a);
        assert!(is_descending(&sigma));
        assert!((sigma[0] - 5.0).abs() < 1e-12);
        assert!((sigma[2] - 1.0).abs() < 1e-12);
        // Leading left vector must be the second canonical axis
        assert!((u[(1, 0)].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_orthonormality_error_detects_scaling() {
        let eye = DMatrix::<f64>::identity(5, 3);
        assert!(orthonormality_error(&eye) < 1e-15);
        let scaled = eye * 2.0;
        assert!((orthonormality_error(&scaled) - 3.0).abs() < 1e-12);
        assert_eq!(orthonormality_error(&DMatrix::zeros(5, 0)), 0.0);
    }
}
