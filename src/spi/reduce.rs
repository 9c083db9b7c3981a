//! Masked reductions for selective pixel integration
//!
//! Every statistic or gradient computed over a patch must go through these
//! functions rather than the unmasked nalgebra reductions, so that pixels
//! flagged unreliable contribute nothing. With an all-true mask each function
//! accumulates in the same order as its unmasked counterpart.
//!
//! Masks are per pixel. Multi-channel inputs lay out `n_channels` consecutive
//! rows per pixel, and a masked pixel drops all of its channel rows together.
//!
//! An empty mask is not an error: means come back as NaN and sums as zero,
//! and [`masked_count`] tells the caller how many pixels contributed.

use nalgebra::{DMatrix, DVector, RowDVector};

use super::mask::PatchLayout;
use crate::common::errors::{ensure_len, AppearanceError, Result};

/// Number of pixels selected by `mask`
#[inline]
pub fn masked_count(mask: &[bool]) -> usize {
    mask.iter().filter(|&&m| m).count()
}

/// Mean of `values` over the entries selected by `mask`.
///
/// Returns NaN when no entry is selected.
pub fn masked_mean(values: &DVector<f64>, mask: &[bool]) -> Result<f64> {
    ensure_len(values.len(), mask.len(), "mask")?;
    let mut sum = 0.0;
    let mut count = 0usize;
    for (&v, &m) in values.iter().zip(mask) {
        if !m {
            continue;
        }
        sum += v;
        count += 1;
    }
    Ok(sum / count as f64)
}

/// Mean of the rows of `matrix` selected by `mask` (one mask entry per row).
///
/// Every element of the result is NaN when no row is selected.
pub fn masked_row_mean(matrix: &DMatrix<f64>, mask: &[bool]) -> Result<RowDVector<f64>> {
    ensure_len(matrix.nrows(), mask.len(), "mask (rows)")?;
    let mut mean = RowDVector::zeros(matrix.ncols());
    let mut count = 0usize;
    for (row_id, _) in mask.iter().enumerate().filter(|&(_, &m)| m) {
        mean += matrix.row(row_id);
        count += 1;
    }
    mean /= count as f64;
    Ok(mean)
}

/// Mean of the columns of `matrix` selected by `mask` (one mask entry per column).
///
/// Every element of the result is NaN when no column is selected.
pub fn masked_col_mean(matrix: &DMatrix<f64>, mask: &[bool]) -> Result<DVector<f64>> {
    ensure_len(matrix.ncols(), mask.len(), "mask (columns)")?;
    let mut mean = DVector::zeros(matrix.nrows());
    let mut count = 0usize;
    for (col_id, _) in mask.iter().enumerate().filter(|&(_, &m)| m) {
        mean += matrix.column(col_id);
        count += 1;
    }
    mean /= count as f64;
    Ok(mean)
}

fn check_jacobian(
    weights: &DVector<f64>,
    jacobian: &DMatrix<f64>,
    mask: &[bool],
    n_pix: usize,
    n_channels: usize,
) -> Result<()> {
    ensure_len(n_pix, mask.len(), "mask")?;
    ensure_len(n_pix * n_channels, weights.len(), "weights")?;
    ensure_len(n_pix * n_channels, jacobian.nrows(), "jacobian rows")
}

/// `sum_p weights[p] * jacobian.row(p)` over every channel row of every
/// selected pixel.
///
/// Returns a zero vector when the mask selects nothing.
pub fn masked_weighted_sum(
    weights: &DVector<f64>,
    jacobian: &DMatrix<f64>,
    mask: &[bool],
    n_pix: usize,
    n_channels: usize,
) -> Result<RowDVector<f64>> {
    check_jacobian(weights, jacobian, mask, n_pix, n_channels)?;

    let mut acc = RowDVector::zeros(jacobian.ncols());
    for (pix_id, _) in mask.iter().enumerate().filter(|&(_, &m)| m) {
        let first_row = pix_id * n_channels;
        for row in first_row..first_row + n_channels {
            let w = weights[row];
            for (a, j) in acc.iter_mut().zip(jacobian.row(row).iter()) {
                *a += w * j;
            }
        }
    }
    Ok(acc)
}

/// `sum_p (weights_a[p] * jacobian_a.row(p) - weights_b[p] * jacobian_b.row(p))`
/// over the selected pixels, accumulated in a single pass.
///
/// Both Jacobians must share the same shape; one mask governs both.
pub fn masked_difference_of_weighted_sums(
    weights_a: &DVector<f64>,
    jacobian_a: &DMatrix<f64>,
    weights_b: &DVector<f64>,
    jacobian_b: &DMatrix<f64>,
    mask: &[bool],
    n_pix: usize,
    n_channels: usize,
) -> Result<RowDVector<f64>> {
    check_jacobian(weights_a, jacobian_a, mask, n_pix, n_channels)?;
    check_jacobian(weights_b, jacobian_b, mask, n_pix, n_channels)?;
    ensure_len(jacobian_a.ncols(), jacobian_b.ncols(), "jacobian columns")?;

    let mut acc = RowDVector::zeros(jacobian_a.ncols());
    for (pix_id, _) in mask.iter().enumerate().filter(|&(_, &m)| m) {
        let first_row = pix_id * n_channels;
        for row in first_row..first_row + n_channels {
            let wa = weights_a[row];
            let wb = weights_b[row];
            let ja = jacobian_a.row(row);
            let jb = jacobian_b.row(row);
            for (col, a) in acc.iter_mut().enumerate() {
                *a += wa * ja[col] - wb * jb[col];
            }
        }
    }
    Ok(acc)
}

fn check_scale(scale_x: usize, scale_y: usize) -> Result<()> {
    if scale_x == 0 || scale_y == 0 {
        return Err(AppearanceError::config(format!(
            "mask scale factors must be positive, got {}x{}",
            scale_x, scale_y
        )));
    }
    Ok(())
}

/// Replicate each low-resolution entry into a `scale_x x scale_y` block.
///
/// `high` must be exactly `low` scaled by the given factors.
pub fn upsample_mask(
    low_mask: &[bool],
    scale_x: usize,
    scale_y: usize,
    low: PatchLayout,
    high: PatchLayout,
) -> Result<Vec<bool>> {
    check_scale(scale_x, scale_y)?;
    ensure_len(low.n_pix(), low_mask.len(), "low-resolution mask")?;
    ensure_len(low.resx * scale_x, high.resx, "high-resolution width")?;
    ensure_len(low.resy * scale_y, high.resy, "high-resolution height")?;

    let mut out = vec![false; high.n_pix()];
    for y_id in 0..low.resy {
        let out_start_y = y_id * scale_y;
        for x_id in 0..low.resx {
            let value = low_mask[y_id * low.resx + x_id];
            let out_start_x = x_id * scale_x;
            for y in out_start_y..out_start_y + scale_y {
                let row = y * high.resx;
                out[row + out_start_x..row + out_start_x + scale_x].fill(value);
            }
        }
    }
    Ok(out)
}

/// Collapse each `scale_x x scale_y` block to one entry by majority vote.
///
/// A block is true when strictly more than half of its entries are true.
/// Inverts [`upsample_mask`] for the same factors.
pub fn downsample_mask(
    high_mask: &[bool],
    scale_x: usize,
    scale_y: usize,
    high: PatchLayout,
) -> Result<Vec<bool>> {
    check_scale(scale_x, scale_y)?;
    ensure_len(high.n_pix(), high_mask.len(), "high-resolution mask")?;
    if high.resx % scale_x != 0 || high.resy % scale_y != 0 {
        let (n_x, n_y) = (high.resx / scale_x, high.resy / scale_y);
        return Err(AppearanceError::dimension(
            n_x * scale_x * n_y * scale_y,
            high.n_pix(),
            format!("{}x{} mask split into {}x{} blocks", high.resx, high.resy, scale_x, scale_y),
        ));
    }

    let low = PatchLayout::new(high.resx / scale_x, high.resy / scale_y);
    let block = scale_x * scale_y;
    let mut out = Vec::with_capacity(low.n_pix());
    for y_id in 0..low.resy {
        for x_id in 0..low.resx {
            let mut votes = 0usize;
            for y in y_id * scale_y..(y_id + 1) * scale_y {
                let row = y * high.resx;
                votes += high_mask[row + x_id * scale_x..row + (x_id + 1) * scale_x]
                    .iter()
                    .filter(|&&m| m)
                    .count();
            }
            out.push(2 * votes > block);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_jacobian(rows: usize, cols: usize, offset: f64) -> DMatrix<f64> {
        DMatrix::from_fn(rows, cols, |r, c| offset + (r * cols + c) as f64 * 0.25 - 1.0)
    }

    #[test]
    fn test_masked_mean_all_true_matches_unmasked() {
        let values = DVector::from_vec(vec![1.5, -2.0, 3.25, 10.0, 0.125]);
        let mask = vec![true; 5];
        let masked = masked_mean(&values, &mask).unwrap();
        assert!((masked - values.mean()).abs() < 1e-12);
    }

    #[test]
    fn test_masked_mean_subset() {
        let values = DVector::from_vec(vec![1.0, 100.0, 3.0]);
        let mask = vec![true, false, true];
        assert_eq!(masked_mean(&values, &mask).unwrap(), 2.0);
    }

    #[test]
    fn test_masked_mean_empty_mask_is_nan() {
        let values = DVector::from_vec(vec![1.0, 2.0]);
        let mask = vec![false, false];
        assert!(masked_mean(&values, &mask).unwrap().is_nan());
        assert_eq!(masked_count(&mask), 0);
    }

    #[test]
    fn test_masked_mean_rejects_wrong_mask_length() {
        let values = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let err = masked_mean(&values, &[true, true]).unwrap_err();
        assert!(matches!(
            err,
            AppearanceError::DimensionMismatch { expected: 3, actual: 2, .. }
        ));
    }

    #[test]
    fn test_row_and_col_means() {
        #[rustfmt::skip]
        let m = DMatrix::from_row_slice(3, 2, &[
            1.0, 10.0,
            2.0, 20.0,
            6.0, 60.0,
        ]);
        let rows = masked_row_mean(&m, &[true, true, true]).unwrap();
        let expected_rows = m.row_mean();
        assert!((rows - expected_rows).abs().max() < 1e-12);

        let rows = masked_row_mean(&m, &[true, false, true]).unwrap();
        assert_eq!(rows[0], 3.5);
        assert_eq!(rows[1], 35.0);

        let cols = masked_col_mean(&m, &[false, true]).unwrap();
        assert_eq!(cols.as_slice(), &[10.0, 20.0, 60.0]);

        let cols = masked_col_mean(&m, &[true, true]).unwrap();
        assert!((cols - m.column_mean()).abs().max() < 1e-12);

        let nan_rows = masked_row_mean(&m, &[false, false, false]).unwrap();
        assert!(nan_rows.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_weighted_sum_all_true_matches_product() {
        let n_pix = 6;
        let n_channels = 2;
        let weights = DVector::from_fn(n_pix * n_channels, |i, _| (i as f64) * 0.5 - 2.0);
        let jac = ramp_jacobian(n_pix * n_channels, 3, 0.0);
        let mask = vec![true; n_pix];

        let masked = masked_weighted_sum(&weights, &jac, &mask, n_pix, n_channels).unwrap();
        let unmasked = weights.transpose() * &jac;
        assert!((masked - unmasked).abs().max() < 1e-10);
    }

    #[test]
    fn test_weighted_sum_masks_all_channels_of_a_pixel() {
        let n_pix = 3;
        let n_channels = 2;
        let weights = DVector::from_element(n_pix * n_channels, 1.0);
        let jac = DMatrix::from_fn(n_pix * n_channels, 1, |r, _| (r + 1) as f64);
        // Pixel 1 owns rows 2 and 3
        let mask = vec![true, false, true];

        let sum = masked_weighted_sum(&weights, &jac, &mask, n_pix, n_channels).unwrap();
        assert_eq!(sum[0], 1.0 + 2.0 + 5.0 + 6.0);
    }

    #[test]
    fn test_weighted_sum_empty_mask_is_zero() {
        let weights = DVector::from_element(4, 3.0);
        let jac = ramp_jacobian(4, 2, 1.0);
        let sum = masked_weighted_sum(&weights, &jac, &[false; 4], 4, 1).unwrap();
        assert!(sum.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_difference_matches_two_sums() {
        let n_pix = 5;
        let wa = DVector::from_fn(n_pix, |i, _| i as f64 + 1.0);
        let wb = DVector::from_fn(n_pix, |i, _| 2.0 - i as f64);
        let ja = ramp_jacobian(n_pix, 4, 0.5);
        let jb = ramp_jacobian(n_pix, 4, -0.75);
        let mask = vec![true, false, true, true, false];

        let diff =
            masked_difference_of_weighted_sums(&wa, &ja, &wb, &jb, &mask, n_pix, 1).unwrap();
        let a = masked_weighted_sum(&wa, &ja, &mask, n_pix, 1).unwrap();
        let b = masked_weighted_sum(&wb, &jb, &mask, n_pix, 1).unwrap();
        assert!((diff - (a - b)).abs().max() < 1e-12);
    }

    #[test]
    fn test_difference_rejects_mismatched_jacobians() {
        let w = DVector::from_element(3, 1.0);
        let ja = DMatrix::zeros(3, 2);
        let jb = DMatrix::zeros(3, 4);
        let err = masked_difference_of_weighted_sums(&w, &ja, &w, &jb, &[true; 3], 3, 1)
            .unwrap_err();
        assert!(matches!(err, AppearanceError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_upsample_replicates_blocks() {
        let low = PatchLayout::new(2, 2);
        let high = PatchLayout::new(4, 6);
        let low_mask = vec![true, false, false, true];
        let out = upsample_mask(&low_mask, 2, 3, low, high).unwrap();
        assert_eq!(out.len(), 24);
        for y in 0..6 {
            for x in 0..4 {
                assert_eq!(out[y * 4 + x], low_mask[(y / 3) * 2 + x / 2], "at ({x},{y})");
            }
        }
    }

    #[test]
    fn test_upsample_rejects_wrong_target() {
        let low = PatchLayout::new(2, 2);
        let err = upsample_mask(&[true; 4], 2, 2, low, PatchLayout::new(5, 4)).unwrap_err();
        assert!(matches!(err, AppearanceError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_downsample_majority() {
        let high = PatchLayout::new(4, 2);
        #[rustfmt::skip]
        let mask = vec![
            true, true,  false, true,
            true, false, false, false,
        ];
        let low = downsample_mask(&mask, 2, 2, high).unwrap();
        assert_eq!(low, vec![true, false]);
    }

    #[test]
    fn test_downsample_rejects_indivisible_layout() {
        let high = PatchLayout::new(5, 4);
        let err = downsample_mask(&[true; 20], 2, 2, high).unwrap_err();
        assert!(matches!(err, AppearanceError::DimensionMismatch { .. }));
    }
}
