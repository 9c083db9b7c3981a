//! Incremental subspace model
//!
//! Holds a low-rank eigenbasis of recent patch appearance, buffers new
//! observations and folds them in with [`sklm`] once a batch is full.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::sklm::sklm;
use crate::common::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_FORGETTING_FACTOR, DEFAULT_LIKELIHOOD_ALPHA, DEFAULT_N_EIGENVEC,
    MAX_SIMILARITY, ORTHONORMALITY_TOLERANCE,
};
use crate::common::errors::{ensure_len, AppearanceError, Result};
use crate::common::linalg::{is_descending, orthonormality_error, thin_qr};

// ============================================================================
// Configuration
// ============================================================================

/// Subspace parameters, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubspaceConfig {
    /// Maximum basis rank
    pub n_eigenvec: usize,
    /// Observations buffered before an update
    pub batch_size: usize,
    /// Weight applied to past observations at each update, in `(0, 1]`
    pub forgetting_factor: f64,
    /// Sharpness of the similarity mapping `exp(-alpha * mse)`
    pub likelihood_alpha: f64,
}

impl Default for SubspaceConfig {
    fn default() -> Self {
        Self {
            n_eigenvec: DEFAULT_N_EIGENVEC,
            batch_size: DEFAULT_BATCH_SIZE,
            forgetting_factor: DEFAULT_FORGETTING_FACTOR,
            likelihood_alpha: DEFAULT_LIKELIHOOD_ALPHA,
        }
    }
}

impl SubspaceConfig {
    /// Create a configuration with the default similarity sharpness
    pub fn new(n_eigenvec: usize, batch_size: usize, forgetting_factor: f64) -> Self {
        Self {
            n_eigenvec,
            batch_size,
            forgetting_factor,
            ..Self::default()
        }
    }

    /// Set the similarity sharpness
    pub fn with_likelihood_alpha(mut self, alpha: f64) -> Self {
        self.likelihood_alpha = alpha;
        self
    }

    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.n_eigenvec == 0 {
            return Err(AppearanceError::config("n_eigenvec must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(AppearanceError::config("batch_size must be at least 1"));
        }
        if !(self.forgetting_factor > 0.0 && self.forgetting_factor <= 1.0) {
            return Err(AppearanceError::config(format!(
                "forgetting_factor must be in (0, 1], got {}",
                self.forgetting_factor
            )));
        }
        if !(self.likelihood_alpha > 0.0 && self.likelihood_alpha.is_finite()) {
            return Err(AppearanceError::config(format!(
                "likelihood_alpha must be positive and finite, got {}",
                self.likelihood_alpha
            )));
        }
        Ok(())
    }
}

// ============================================================================
// State
// ============================================================================

/// Lifecycle of an [`IncrementalSubspace`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubspaceState {
    /// No mean yet
    Uninitialized,
    /// Mean set, nothing buffered
    Ready,
    /// Observations buffered, waiting for a full batch
    Accumulating,
}

/// Summary of one basis update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasisUpdate {
    /// Observations folded in by this update
    pub batch_len: usize,
    /// Basis rank afterwards
    pub rank: usize,
    /// Largest singular value afterwards, if any
    pub leading_sigma: Option<f64>,
    /// Effective observation count afterwards
    pub n_observations: f64,
}

/// Serializable snapshot of an [`IncrementalSubspace`] for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubspaceSnapshot {
    pub config: SubspaceConfig,
    pub dim: usize,
    pub rank: usize,
    pub n_prev_patches: f64,
    pub available: bool,
    /// Empty when the model was never initialized.
    pub mean: Vec<f64>,
    /// Flat column-major: `rank` columns of length `dim`.
    pub basis: Vec<f64>,
    pub sigma: Vec<f64>,
    /// Buffered observations not yet folded into the basis.
    pub pending: Vec<Vec<f64>>,
}

/// Low-rank appearance subspace with batched SKLM updates
#[derive(Debug, Clone)]
pub struct IncrementalSubspace {
    config: SubspaceConfig,
    mean: Option<DVector<f64>>,
    basis: DMatrix<f64>,
    sigma: DVector<f64>,
    n_prev_patches: f64,
    pending: Vec<DVector<f64>>,
    available: bool,
}

impl IncrementalSubspace {
    /// Create an uninitialized model
    pub fn new(config: SubspaceConfig) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Subspace model: n_eigenvec={}, batch_size={}, forgetting_factor={}",
            config.n_eigenvec,
            config.batch_size,
            config.forgetting_factor
        );
        Ok(Self {
            config,
            mean: None,
            basis: DMatrix::zeros(0, 0),
            sigma: DVector::zeros(0),
            n_prev_patches: 0.0,
            pending: Vec::new(),
            available: false,
        })
    }

    /// Seed the mean with the first observation.
    ///
    /// Re-initializing discards the basis and any buffered observations.
    pub fn initialize(&mut self, first: &DVector<f64>) -> Result<()> {
        if first.is_empty() {
            return Err(AppearanceError::dimension(1, 0, "initial patch length"));
        }
        self.mean = Some(first.clone());
        self.basis = DMatrix::zeros(first.len(), 0);
        self.sigma = DVector::zeros(0);
        self.n_prev_patches = 1.0;
        self.pending.clear();
        self.available = false;
        log::debug!("Subspace initialized: dim={}", first.len());
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &SubspaceConfig {
        &self.config
    }

    pub fn state(&self) -> SubspaceState {
        match (&self.mean, self.pending.is_empty()) {
            (None, _) => SubspaceState::Uninitialized,
            (Some(_), true) => SubspaceState::Ready,
            (Some(_), false) => SubspaceState::Accumulating,
        }
    }

    /// Patch dimension, 0 before `initialize`
    pub fn dim(&self) -> usize {
        self.mean.as_ref().map_or(0, |m| m.len())
    }

    /// Current basis rank
    pub fn rank(&self) -> usize {
        self.basis.ncols()
    }

    /// Orthonormal basis, `dim x rank`
    pub fn basis(&self) -> &DMatrix<f64> {
        &self.basis
    }

    /// Singular values, descending
    pub fn sigma(&self) -> &DVector<f64> {
        &self.sigma
    }

    pub fn mean(&self) -> Option<&DVector<f64>> {
        self.mean.as_ref()
    }

    /// Effective number of observations absorbed
    pub fn n_prev_patches(&self) -> f64 {
        self.n_prev_patches
    }

    /// True once at least one basis update has run
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Number of buffered observations
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn require_mean(&self, context: &str) -> Result<&DVector<f64>> {
        self.mean
            .as_ref()
            .ok_or_else(|| AppearanceError::not_initialized(context))
    }

    // ------------------------------------------------------------------------
    // Observation and update
    // ------------------------------------------------------------------------

    /// Buffer an observation, running an update when the batch is full.
    ///
    /// # Returns
    /// The update summary when this observation completed a batch.
    pub fn observe(&mut self, patch: &DVector<f64>) -> Result<Option<BasisUpdate>> {
        let dim = self.require_mean("observe")?.len();
        ensure_len(dim, patch.len(), "patch")?;
        self.pending.push(patch.clone());
        log::trace!("Buffered observation {}/{}", self.pending.len(), self.config.batch_size);
        if self.pending.len() >= self.config.batch_size {
            self.update_basis().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Buffer an observation whose unreliable pixels are first replaced by
    /// the model's reconstruction.
    ///
    /// `mask` has one entry per pixel; each pixel spans `n_channels`
    /// consecutive entries of `patch`.
    pub fn observe_masked(
        &mut self,
        patch: &DVector<f64>,
        mask: &[bool],
        n_channels: usize,
    ) -> Result<Option<BasisUpdate>> {
        let filled = self.fill_unreliable(patch, mask, n_channels)?;
        self.observe(&filled)
    }

    fn fill_unreliable(
        &self,
        patch: &DVector<f64>,
        mask: &[bool],
        n_channels: usize,
    ) -> Result<DVector<f64>> {
        let mean = self.require_mean("observe_masked")?;
        check_masked_input(mean, patch, mask, n_channels)?;

        let recon = mean + &self.basis * self.masked_coefficients(mean, patch, mask, n_channels);
        let mut filled = patch.clone();
        for (p, _) in mask.iter().enumerate().filter(|&(_, &m)| !m) {
            let start = p * n_channels;
            filled
                .rows_mut(start, n_channels)
                .copy_from(&recon.rows(start, n_channels));
        }
        Ok(filled)
    }

    /// Basis coefficients fitted by least squares to the selected pixels only
    fn masked_coefficients(
        &self,
        mean: &DVector<f64>,
        patch: &DVector<f64>,
        mask: &[bool],
        n_channels: usize,
    ) -> DVector<f64> {
        let k = self.rank();
        if k == 0 {
            return DVector::zeros(0);
        }
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|&(_, &m)| m)
            .flat_map(|(p, _)| p * n_channels..(p + 1) * n_channels)
            .collect();
        let basis_rows = self.basis.select_rows(rows.iter());
        let centered =
            DVector::from_iterator(rows.len(), rows.iter().map(|&i| patch[i] - mean[i]));
        let projected = basis_rows.tr_mul(&centered);
        if rows.len() < k {
            return projected;
        }
        let (q, r) = thin_qr(basis_rows);
        r.solve_upper_triangular(&q.tr_mul(&centered))
            .unwrap_or(projected)
    }

    /// Run an update on whatever is buffered.
    ///
    /// Returns `None` when nothing is pending.
    pub fn flush(&mut self) -> Result<Option<BasisUpdate>> {
        self.require_mean("flush")?;
        if self.pending.is_empty() {
            return Ok(None);
        }
        self.update_basis().map(Some)
    }

    fn update_basis(&mut self) -> Result<BasisUpdate> {
        let mean = self.require_mean("update_basis")?;
        let batch = DMatrix::from_columns(&self.pending);
        let out = sklm(
            &self.basis,
            &self.sigma,
            mean,
            &batch,
            self.n_prev_patches,
            self.config.forgetting_factor,
            self.config.n_eigenvec,
        )?;

        debug_assert!(orthonormality_error(&out.basis) <= ORTHONORMALITY_TOLERANCE);

        let update = BasisUpdate {
            batch_len: self.pending.len(),
            rank: out.basis.ncols(),
            leading_sigma: out.sigma.iter().next().copied(),
            n_observations: out.n_observations,
        };

        self.basis = out.basis;
        self.sigma = out.sigma;
        self.mean = Some(out.mean);
        self.n_prev_patches = out.n_observations;
        self.pending.clear();
        self.available = true;

        log::debug!(
            "Basis update: batch={}, rank={}, sigma_max={:.4e}, n={:.3}",
            update.batch_len,
            update.rank,
            update.leading_sigma.unwrap_or(0.0),
            update.n_observations
        );
        Ok(update)
    }

    // ------------------------------------------------------------------------
    // Projection and scoring
    // ------------------------------------------------------------------------

    /// Basis coefficients of `patch - mean`
    pub fn project(&self, patch: &DVector<f64>) -> Result<DVector<f64>> {
        let mean = self.require_mean("project")?;
        ensure_len(mean.len(), patch.len(), "patch")?;
        Ok(self.basis.tr_mul(&(patch - mean)))
    }

    /// Closest point to `patch` in the affine subspace `mean + span(U)`
    pub fn reconstruct(&self, patch: &DVector<f64>) -> Result<DVector<f64>> {
        let mean = self.require_mean("reconstruct")?;
        ensure_len(mean.len(), patch.len(), "patch")?;
        let coeffs = self.basis.tr_mul(&(patch - mean));
        Ok(mean + &self.basis * coeffs)
    }

    /// Reconstruction residual `patch - reconstruct(patch)`
    pub fn residual(&self, patch: &DVector<f64>) -> Result<DVector<f64>> {
        let recon = self.reconstruct(patch)?;
        Ok(patch - recon)
    }

    /// Residual against a reconstruction fitted to the selected pixels only.
    ///
    /// Unselected pixels do not influence the fit, so an occluder leaves the
    /// residual of the remaining pixels untouched.
    pub fn masked_residual(
        &self,
        patch: &DVector<f64>,
        mask: &[bool],
        n_channels: usize,
    ) -> Result<DVector<f64>> {
        let mean = self.require_mean("masked_residual")?;
        check_masked_input(mean, patch, mask, n_channels)?;
        let coeffs = self.masked_coefficients(mean, patch, mask, n_channels);
        Ok(patch - mean - &self.basis * coeffs)
    }

    /// Similarity in `[0, 1]`, `exp(-alpha * ||r||^2 / dim)`.
    ///
    /// Reports [`MAX_SIMILARITY`] until the first basis update.
    pub fn score(&self, patch: &DVector<f64>) -> Result<f64> {
        let residual = self.residual(patch)?;
        if !self.available {
            return Ok(MAX_SIMILARITY);
        }
        let mse = residual.norm_squared() / residual.len() as f64;
        Ok((-self.config.likelihood_alpha * mse).exp())
    }

    /// Score many candidate patches against the same state.
    ///
    /// With the rayon feature the candidates are scored in parallel.
    pub fn score_batch(&self, patches: &[DVector<f64>]) -> Result<Vec<f64>> {
        #[cfg(feature = "rayon")]
        {
            patches.par_iter().map(|p| self.score(p)).collect()
        }

        #[cfg(not(feature = "rayon"))]
        {
            patches.iter().map(|p| self.score(p)).collect()
        }
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Capture the full model state.
    pub fn snapshot(&self) -> SubspaceSnapshot {
        SubspaceSnapshot {
            config: self.config,
            dim: self.dim(),
            rank: self.rank(),
            n_prev_patches: self.n_prev_patches,
            available: self.available,
            mean: self
                .mean
                .as_ref()
                .map_or_else(Vec::new, |m| m.as_slice().to_vec()),
            basis: self.basis.as_slice().to_vec(),
            sigma: self.sigma.as_slice().to_vec(),
            pending: self.pending.iter().map(|p| p.as_slice().to_vec()).collect(),
        }
    }

    /// Restore from a snapshot.
    ///
    /// Sizes must agree, the basis must be orthonormal with non-negative
    /// descending `sigma`, and fewer than `batch_size` patches may be pending.
    pub fn from_snapshot(snap: SubspaceSnapshot) -> Result<Self> {
        snap.config.validate()?;
        ensure_len(snap.dim, snap.mean.len(), "snapshot mean")?;
        ensure_len(snap.dim * snap.rank, snap.basis.len(), "snapshot basis")?;
        ensure_len(snap.rank, snap.sigma.len(), "snapshot sigma")?;
        for p in &snap.pending {
            ensure_len(snap.dim, p.len(), "snapshot pending patch")?;
        }
        if snap.rank > snap.config.n_eigenvec {
            return Err(AppearanceError::config(format!(
                "snapshot rank {} exceeds n_eigenvec {}",
                snap.rank, snap.config.n_eigenvec
            )));
        }
        if snap.pending.len() >= snap.config.batch_size {
            return Err(AppearanceError::config(format!(
                "snapshot holds {} pending patches, batch_size is {}",
                snap.pending.len(),
                snap.config.batch_size
            )));
        }
        if !snap.n_prev_patches.is_finite() || snap.n_prev_patches < 0.0 {
            return Err(AppearanceError::config(format!(
                "snapshot n_prev_patches must be finite and non-negative, got {}",
                snap.n_prev_patches
            )));
        }

        let basis = DMatrix::from_vec(snap.dim, snap.rank, snap.basis);
        let sigma = DVector::from_vec(snap.sigma);
        if !sigma.iter().all(|s| s.is_finite() && *s >= 0.0) || !is_descending(&sigma) {
            return Err(AppearanceError::config(
                "snapshot sigma must be finite, non-negative and descending",
            ));
        }
        let ortho_err = orthonormality_error(&basis);
        if ortho_err.is_nan() || ortho_err > ORTHONORMALITY_TOLERANCE {
            return Err(AppearanceError::config(format!(
                "snapshot basis is not orthonormal (error {:e})",
                ortho_err
            )));
        }

        let mean = (snap.dim > 0).then(|| DVector::from_vec(snap.mean));
        Ok(Self {
            config: snap.config,
            mean,
            basis,
            sigma,
            n_prev_patches: snap.n_prev_patches,
            pending: snap.pending.into_iter().map(DVector::from_vec).collect(),
            available: snap.available,
        })
    }
}

fn check_masked_input(
    mean: &DVector<f64>,
    patch: &DVector<f64>,
    mask: &[bool],
    n_channels: usize,
) -> Result<()> {
    ensure_len(mean.len(), patch.len(), "patch")?;
    ensure_len(mean.len(), mask.len() * n_channels, "mask pixels x channels")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::linalg::{is_descending, is_orthonormal};

    fn constant(dim: usize, value: f64) -> DVector<f64> {
        DVector::from_element(dim, value)
    }

    #[test]
    fn test_config_validation() {
        assert!(SubspaceConfig::default().validate().is_ok());
        assert!(SubspaceConfig::new(0, 5, 0.9).validate().is_err());
        assert!(SubspaceConfig::new(4, 0, 0.9).validate().is_err());
        assert!(SubspaceConfig::new(4, 5, 0.0).validate().is_err());
        assert!(SubspaceConfig::new(4, 5, 1.5).validate().is_err());
        assert!(SubspaceConfig::new(4, 5, 1.0).validate().is_ok());
        assert!(SubspaceConfig::new(4, 5, 1.0)
            .with_likelihood_alpha(-1.0)
            .validate()
            .is_err());
        assert!(IncrementalSubspace::new(SubspaceConfig::new(0, 1, 1.0)).is_err());
    }

    #[test]
    fn test_config_json_defaults_and_unknown_fields() {
        let cfg: SubspaceConfig = serde_json::from_str(r#"{"n_eigenvec": 3}"#).unwrap();
        assert_eq!(cfg.n_eigenvec, 3);
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
        assert!(serde_json::from_str::<SubspaceConfig>(r#"{"rank": 3}"#).is_err());
    }

    #[test]
    fn test_state_transitions() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(2, 3, 1.0)).unwrap();
        assert_eq!(model.state(), SubspaceState::Uninitialized);

        model.initialize(&constant(4, 1.0)).unwrap();
        assert_eq!(model.state(), SubspaceState::Ready);
        assert_eq!(model.n_prev_patches(), 1.0);
        assert!(!model.is_available());

        assert!(model.observe(&constant(4, 2.0)).unwrap().is_none());
        assert_eq!(model.state(), SubspaceState::Accumulating);
        assert!(model.observe(&constant(4, 3.0)).unwrap().is_none());
        let update = model.observe(&constant(4, 4.0)).unwrap().unwrap();
        assert_eq!(update.batch_len, 3);
        assert_eq!(model.state(), SubspaceState::Ready);
        assert!(model.is_available());
        assert_eq!(model.n_prev_patches(), 4.0);
    }

    #[test]
    fn test_operations_before_initialize() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::default()).unwrap();
        let patch = constant(4, 1.0);
        assert!(matches!(
            model.observe(&patch),
            Err(AppearanceError::NotInitialized { .. })
        ));
        assert!(matches!(
            model.score(&patch),
            Err(AppearanceError::NotInitialized { .. })
        ));
        assert!(model.flush().is_err());
    }

    #[test]
    fn test_dimension_mismatch_leaves_state() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(2, 2, 1.0)).unwrap();
        model.initialize(&constant(4, 1.0)).unwrap();
        model.observe(&constant(4, 2.0)).unwrap();

        let err = model.observe(&constant(5, 2.0)).unwrap_err();
        assert!(matches!(err, AppearanceError::DimensionMismatch { expected: 4, actual: 5, .. }));
        assert_eq!(model.pending(), 1);
        assert!(model.score(&constant(3, 0.0)).is_err());
    }

    #[test]
    fn test_score_is_maximal_before_first_update() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(2, 10, 1.0)).unwrap();
        model.initialize(&constant(9, 0.0)).unwrap();
        assert_eq!(model.score(&constant(9, 500.0)).unwrap(), MAX_SIMILARITY);
    }

    #[test]
    fn test_score_decreases_with_residual() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(2, 2, 1.0)).unwrap();
        model.initialize(&constant(4, 0.0)).unwrap();
        model.observe(&constant(4, 0.0)).unwrap();
        model.observe(&constant(4, 0.0)).unwrap();
        assert!(model.is_available());

        let near = model.score(&constant(4, 0.1)).unwrap();
        let far = model.score(&constant(4, 1.0)).unwrap();
        assert!((model.score(&constant(4, 0.0)).unwrap() - 1.0).abs() < 1e-12);
        assert!(near > far);
        assert!((far - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_flush_partial_batch() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(3, 10, 1.0)).unwrap();
        model.initialize(&DVector::from_vec(vec![0.0, 0.0, 0.0])).unwrap();
        assert!(model.flush().unwrap().is_none());

        model.observe(&DVector::from_vec(vec![1.0, 0.0, 0.0])).unwrap();
        model.observe(&DVector::from_vec(vec![-1.0, 0.0, 0.0])).unwrap();
        let update = model.flush().unwrap().unwrap();
        assert_eq!(update.batch_len, 2);
        assert_eq!(model.pending(), 0);
        assert!(model.rank() >= 1);
        assert!(is_orthonormal(model.basis(), ORTHONORMALITY_TOLERANCE));
        assert!(is_descending(model.sigma()));
    }

    #[test]
    fn test_project_reconstruct_residual() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(1, 4, 1.0)).unwrap();
        model.initialize(&DVector::from_vec(vec![0.0, 0.0, 0.0])).unwrap();
        for v in [2.0, -2.0, 1.0, -1.0] {
            model.observe(&DVector::from_vec(vec![v, 0.0, 0.0])).unwrap();
        }
        assert_eq!(model.rank(), 1);

        let on_axis = DVector::from_vec(vec![3.0, 0.0, 0.0]);
        let recon = model.reconstruct(&on_axis).unwrap();
        assert!((recon - &on_axis).norm() < 1e-9);
        assert_eq!(model.project(&on_axis).unwrap().len(), 1);

        let off_axis = DVector::from_vec(vec![0.0, 2.0, 0.0]);
        let r = model.residual(&off_axis).unwrap();
        assert!((r.norm() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_masked_residual_ignores_outlier_pixel() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(1, 4, 1.0)).unwrap();
        model.initialize(&constant(4, 0.0)).unwrap();
        for v in [2.0, -2.0, 1.0, -1.0] {
            model.observe(&constant(4, v)).unwrap();
        }
        assert_eq!(model.rank(), 1);

        let query = DVector::from_vec(vec![3.0, 3.0, 3.0, 50.0]);
        let mask = [true, true, true, false];
        let masked = model.masked_residual(&query, &mask, 1).unwrap();
        for i in 0..3 {
            assert!(masked[i].abs() < 1e-9, "pixel {}: {}", i, masked[i]);
        }
        let plain = model.residual(&query).unwrap();
        assert!(plain[0].abs() > 10.0);

        // The reconstruction replaces the outlier when observed with the mask
        let filled = model.fill_unreliable(&query, &mask, 1).unwrap();
        assert!((filled[3] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_observe_masked_ignores_occluded_pixels() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(2, 1, 1.0)).unwrap();
        model.initialize(&constant(4, 10.0)).unwrap();

        // Pixel 3 is an occluder; with the mask it must not move the mean
        let mut patch = constant(4, 10.0);
        patch[3] = 255.0;
        model
            .observe_masked(&patch, &[true, true, true, false], 1)
            .unwrap();
        let mean = model.mean().unwrap();
        assert!((mean[3] - 10.0).abs() < 1e-12);
        assert_eq!(model.rank(), 0);
    }

    #[test]
    fn test_observe_masked_checks_mask_size() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(2, 1, 1.0)).unwrap();
        model.initialize(&constant(6, 1.0)).unwrap();
        assert!(model.observe_masked(&constant(6, 1.0), &[true; 3], 2).is_ok());
        assert!(model.observe_masked(&constant(6, 1.0), &[true; 4], 2).is_err());
    }

    #[test]
    fn test_score_batch_matches_score() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(2, 2, 1.0)).unwrap();
        model.initialize(&DVector::from_vec(vec![0.0, 1.0, 0.0])).unwrap();
        model.observe(&DVector::from_vec(vec![1.0, 1.0, 0.0])).unwrap();
        model.observe(&DVector::from_vec(vec![0.0, 2.0, 1.0])).unwrap();

        let candidates: Vec<_> = (0..6)
            .map(|i| DVector::from_vec(vec![i as f64 * 0.3, 1.0, -(i as f64) * 0.1]))
            .collect();
        let batch = model.score_batch(&candidates).unwrap();
        for (c, s) in candidates.iter().zip(&batch) {
            assert_eq!(*s, model.score(c).unwrap());
        }
    }

    #[test]
    fn test_snapshot_restores_scores() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(2, 2, 0.9)).unwrap();
        model.initialize(&DVector::from_vec(vec![1.0, 0.0, 0.0, 2.0])).unwrap();
        model.observe(&DVector::from_vec(vec![2.0, 1.0, 0.0, 2.0])).unwrap();
        model.observe(&DVector::from_vec(vec![0.0, 0.0, 1.0, 3.0])).unwrap();
        model.observe(&DVector::from_vec(vec![1.0, 1.0, 1.0, 1.0])).unwrap();

        let json = serde_json::to_string(&model.snapshot()).unwrap();
        let snap: SubspaceSnapshot = serde_json::from_str(&json).unwrap();
        let restored = IncrementalSubspace::from_snapshot(snap).unwrap();

        assert_eq!(restored.pending(), 1);
        assert_eq!(restored.rank(), model.rank());
        let query = DVector::from_vec(vec![0.5, 0.5, 0.5, 2.0]);
        assert!((restored.score(&query).unwrap() - model.score(&query).unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_rejects_inconsistent_sizes() {
        let model = IncrementalSubspace::new(SubspaceConfig::default()).unwrap();
        let mut snap = model.snapshot();
        assert_eq!(snap.dim, 0);
        assert!(IncrementalSubspace::from_snapshot(snap.clone()).is_ok());
        snap.rank = 1;
        assert!(IncrementalSubspace::from_snapshot(snap).is_err());
    }

    fn trained_snapshot() -> SubspaceSnapshot {
        let mut model = IncrementalSubspace::new(SubspaceConfig::new(2, 2, 0.9)).unwrap();
        model.initialize(&DVector::from_vec(vec![1.0, 0.0, 0.0, 2.0])).unwrap();
        model.observe(&DVector::from_vec(vec![2.0, 1.0, 0.0, 2.0])).unwrap();
        model.observe(&DVector::from_vec(vec![0.0, 0.0, 3.0, 1.0])).unwrap();
        let snap = model.snapshot();
        assert_eq!(snap.rank, 2);
        snap
    }

    #[test]
    fn test_snapshot_rejects_broken_basis() {
        let snap = trained_snapshot();
        assert!(IncrementalSubspace::from_snapshot(snap.clone()).is_ok());

        let mut scaled = snap.clone();
        scaled.basis.iter_mut().for_each(|v| *v *= 2.0);
        assert!(matches!(
            IncrementalSubspace::from_snapshot(scaled),
            Err(AppearanceError::InvalidConfiguration { .. })
        ));

        let mut unsorted = snap.clone();
        unsorted.sigma.reverse();
        assert!(IncrementalSubspace::from_snapshot(unsorted).is_err());

        let mut negative = snap;
        negative.sigma[1] = -1.0;
        assert!(IncrementalSubspace::from_snapshot(negative).is_err());
    }

    #[test]
    fn test_snapshot_rejects_bad_counts() {
        let snap = trained_snapshot();

        let mut nan = snap.clone();
        nan.n_prev_patches = f64::NAN;
        assert!(IncrementalSubspace::from_snapshot(nan).is_err());

        let mut negative = snap.clone();
        negative.n_prev_patches = -1.0;
        assert!(IncrementalSubspace::from_snapshot(negative).is_err());

        let mut overfull = snap;
        overfull.pending = vec![vec![0.0; 4]; 2];
        assert!(IncrementalSubspace::from_snapshot(overfull).is_err());
    }

    #[test]
    fn test_initialize_rejects_empty_patch() {
        let mut model = IncrementalSubspace::new(SubspaceConfig::default()).unwrap();
        assert!(matches!(
            model.initialize(&DVector::zeros(0)),
            Err(AppearanceError::DimensionMismatch { .. })
        ));
        assert_eq!(model.state(), SubspaceState::Uninitialized);
    }
}
