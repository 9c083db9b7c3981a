//! PCA appearance model driven frame by frame by an external optimizer.
//!
//! Per frame the optimizer calls [`PcaAppearanceModel::set_first_iter`], then
//! alternates [`PcaAppearanceModel::update_similarity`] with gradient queries,
//! and finally [`PcaAppearanceModel::clear_first_iter`], which feeds the best
//! patch of the frame back into the subspace.
//!
//! Similarity is the negative masked sum of squared reconstruction residuals.
//! Likelihood maps the masked mean squared residual into `[0, 1]`.

use nalgebra::{DMatrix, DVector, RowDVector};
use serde::{Deserialize, Serialize};

use crate::common::constants::MAX_SIMILARITY;
use crate::common::errors::{AppearanceError, Result};
use crate::reporter::{ModelReporter, NoOpReporter};
use crate::spi::mask::full_mask;
use crate::spi::reduce::{
    masked_count, masked_difference_of_weighted_sums, masked_row_mean, masked_weighted_sum,
};
use crate::subspace::{BasisUpdate, IncrementalSubspace, SubspaceConfig};

/// Appearance model parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PcaParams {
    pub subspace: SubspaceConfig,
    /// Values per pixel; patches store channels of one pixel contiguously
    pub n_channels: usize,
}

impl Default for PcaParams {
    fn default() -> Self {
        Self {
            subspace: SubspaceConfig::default(),
            n_channels: 1,
        }
    }
}

impl PcaParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_channels == 0 {
            return Err(AppearanceError::config("n_channels must be at least 1"));
        }
        self.subspace.validate()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Best-scoring patch seen during the current frame
#[derive(Debug, Clone)]
struct FrameBest {
    /// Negative mean squared residual over the selected entries
    fit: f64,
    patch: DVector<f64>,
    mask: Option<Vec<bool>>,
}

/// Incremental PCA appearance model
#[derive(Debug, Clone)]
pub struct PcaAppearanceModel<R: ModelReporter = NoOpReporter> {
    params: PcaParams,
    subspace: IncrementalSubspace,
    reporter: R,
    n_pix: usize,
    init_patch: Option<DVector<f64>>,
    init_residual: DVector<f64>,
    curr_residual: Option<DVector<f64>>,
    similarity: f64,
    likelihood: f64,
    first_iter: bool,
    frame_best: Option<FrameBest>,
    frame: usize,
}

impl PcaAppearanceModel<NoOpReporter> {
    pub fn new(params: PcaParams) -> Result<Self> {
        Self::with_reporter(params, NoOpReporter)
    }
}

impl<R: ModelReporter> PcaAppearanceModel<R> {
    /// Create a model that sends events to `reporter`
    pub fn with_reporter(params: PcaParams, reporter: R) -> Result<Self> {
        params.validate()?;
        let subspace = IncrementalSubspace::new(params.subspace)?;
        Ok(Self {
            params,
            subspace,
            reporter,
            n_pix: 0,
            init_patch: None,
            init_residual: DVector::zeros(0),
            curr_residual: None,
            similarity: 0.0,
            likelihood: MAX_SIMILARITY,
            first_iter: false,
            frame_best: None,
            frame: 0,
        })
    }

    /// Seed the model with the reference patch of the first frame.
    pub fn initialize(&mut self, init_patch: &DVector<f64>) -> Result<()> {
        let n_channels = self.params.n_channels;
        if init_patch.len() % n_channels != 0 {
            return Err(AppearanceError::dimension(
                init_patch.len() - init_patch.len() % n_channels,
                init_patch.len(),
                format!("patch length (multiple of {} channels)", n_channels),
            ));
        }
        self.subspace.initialize(init_patch)?;
        self.n_pix = init_patch.len() / n_channels;
        self.init_residual = self.subspace.residual(init_patch)?;
        self.init_patch = Some(init_patch.clone());
        self.curr_residual = None;
        self.similarity = 0.0;
        self.likelihood = MAX_SIMILARITY;
        self.first_iter = false;
        self.frame_best = None;
        self.frame = 0;

        log::info!(
            "PCA appearance model: n_pix={}, n_channels={}, n_eigenvec={}",
            self.n_pix,
            n_channels,
            self.params.subspace.n_eigenvec
        );
        self.reporter.on_initialize(init_patch.len(), n_channels);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn params(&self) -> &PcaParams {
        &self.params
    }

    pub fn subspace(&self) -> &IncrementalSubspace {
        &self.subspace
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    pub fn n_pix(&self) -> usize {
        self.n_pix
    }

    pub fn n_channels(&self) -> usize {
        self.params.n_channels
    }

    /// Index of the current frame
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Negative masked SSD from the last `update_similarity`
    pub fn similarity(&self) -> f64 {
        self.similarity
    }

    /// Likelihood in `[0, 1]` from the last `update_similarity`; NaN when
    /// the mask selected nothing
    pub fn likelihood(&self) -> f64 {
        self.likelihood
    }

    pub fn is_first_iter(&self) -> bool {
        self.first_iter
    }

    // ------------------------------------------------------------------------
    // Per-frame protocol
    // ------------------------------------------------------------------------

    /// Mark the start of a new frame.
    pub fn set_first_iter(&mut self) {
        self.first_iter = true;
        self.frame_best = None;
    }

    /// Evaluate a candidate patch under an optional reliability mask.
    ///
    /// With a mask, the reconstruction is fitted to the reliable pixels only.
    ///
    /// # Returns
    /// The likelihood of `patch`.
    pub fn update_similarity(&mut self, patch: &DVector<f64>, mask: Option<&[bool]>) -> Result<f64> {
        self.require_initialized("update_similarity")?;
        let masked = mask.is_some();
        let mask = self.resolve_mask(mask)?;
        let residual = if masked {
            self.subspace
                .masked_residual(patch, &mask, self.params.n_channels)?
        } else {
            self.subspace.residual(patch)?
        };

        let n_selected = masked_count(&mask) * self.params.n_channels;
        let ssd = masked_ssd(&residual, &mask, self.params.n_channels);
        self.similarity = -ssd;
        self.likelihood = if n_selected == 0 {
            log::warn!("update_similarity: mask selects no pixel");
            self.reporter.on_degenerate_mask(self.frame, "update_similarity");
            f64::NAN
        } else if !self.subspace.is_available() {
            MAX_SIMILARITY
        } else {
            (-self.params.subspace.likelihood_alpha * ssd / n_selected as f64).exp()
        };
        log::trace!(
            "similarity={:.6}, likelihood={:.6}",
            self.similarity,
            self.likelihood
        );
        self.reporter.on_observation(self.frame, self.likelihood);

        // Ranked by fit rather than likelihood, which saturates before the
        // first basis update
        if self.first_iter && n_selected > 0 {
            let fit = -ssd / n_selected as f64;
            let better = self
                .frame_best
                .as_ref()
                .map_or(true, |best| fit > best.fit);
            if better {
                self.frame_best = Some(FrameBest {
                    fit,
                    patch: patch.clone(),
                    mask: (n_selected < residual.len()).then(|| mask.clone()),
                });
            }
        }
        self.curr_residual = Some(residual);
        Ok(self.likelihood)
    }

    /// Gradient of the similarity with respect to the warp parameters.
    ///
    /// `jacobian` is `(n_pix * n_channels) x n_params`, the derivative of the
    /// current patch with respect to those parameters.
    pub fn curr_grad(&mut self, jacobian: &DMatrix<f64>, mask: Option<&[bool]>) -> Result<RowDVector<f64>> {
        let residual = self
            .curr_residual
            .as_ref()
            .ok_or_else(|| AppearanceError::not_initialized("curr_grad"))?;
        let mask = self.resolve_mask(mask)?;
        if masked_count(&mask) == 0 {
            log::warn!("curr_grad: mask selects no pixel");
            self.reporter.on_degenerate_mask(self.frame, "curr_grad");
        }
        let weights = residual * -2.0;
        masked_weighted_sum(&weights, jacobian, &mask, self.n_pix, self.params.n_channels)
    }

    /// Difference between the current-patch gradient and the reference-patch
    /// gradient, accumulated in one pass over the mask.
    pub fn diff_of_grads(
        &mut self,
        curr_jacobian: &DMatrix<f64>,
        init_jacobian: &DMatrix<f64>,
        mask: Option<&[bool]>,
    ) -> Result<RowDVector<f64>> {
        let residual = self
            .curr_residual
            .as_ref()
            .ok_or_else(|| AppearanceError::not_initialized("diff_of_grads"))?;
        let mask = self.resolve_mask(mask)?;
        if masked_count(&mask) == 0 {
            log::warn!("diff_of_grads: mask selects no pixel");
            self.reporter.on_degenerate_mask(self.frame, "diff_of_grads");
        }
        let curr_weights = residual * -2.0;
        let init_weights = &self.init_residual * -2.0;
        masked_difference_of_weighted_sums(
            &curr_weights,
            curr_jacobian,
            &init_weights,
            init_jacobian,
            &mask,
            self.n_pix,
            self.params.n_channels,
        )
    }

    /// Mark the end of a frame and feed its best patch into the subspace.
    ///
    /// # Returns
    /// The basis update if the patch completed a batch.
    pub fn clear_first_iter(&mut self) -> Result<Option<BasisUpdate>> {
        self.require_initialized("clear_first_iter")?;
        self.first_iter = false;
        let update = match self.frame_best.take() {
            Some(best) => self.observe(&best.patch, best.mask.as_deref())?,
            None => None,
        };
        self.reporter.on_frame_complete(self.frame);
        self.frame += 1;
        Ok(update)
    }

    /// Feed a patch directly into the subspace, bypassing the per-frame
    /// best-patch selection.
    pub fn update_model(&mut self, patch: &DVector<f64>, mask: Option<&[bool]>) -> Result<Option<BasisUpdate>> {
        self.require_initialized("update_model")?;
        self.observe(patch, mask)
    }

    /// Force a basis update with whatever is buffered.
    pub fn flush_model(&mut self) -> Result<Option<BasisUpdate>> {
        let update = self.subspace.flush()?;
        if let Some(u) = &update {
            self.after_basis_update(u)?;
        }
        Ok(update)
    }

    /// Per-channel mean of `patch` over the selected pixels.
    ///
    /// NaN entries when the mask selects nothing.
    pub fn channel_means(&self, patch: &DVector<f64>, mask: Option<&[bool]>) -> Result<RowDVector<f64>> {
        self.require_initialized("channel_means")?;
        let mask = self.resolve_mask(mask)?;
        let n_channels = self.params.n_channels;
        if patch.len() != self.n_pix * n_channels {
            return Err(AppearanceError::dimension(
                self.n_pix * n_channels,
                patch.len(),
                "patch",
            ));
        }
        let pixels = DMatrix::from_row_slice(self.n_pix, n_channels, patch.as_slice());
        masked_row_mean(&pixels, &mask)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn require_initialized(&self, context: &str) -> Result<()> {
        if self.init_patch.is_none() {
            return Err(AppearanceError::not_initialized(context));
        }
        Ok(())
    }

    fn resolve_mask(&self, mask: Option<&[bool]>) -> Result<Vec<bool>> {
        match mask {
            Some(m) if m.len() != self.n_pix => {
                Err(AppearanceError::dimension(self.n_pix, m.len(), "mask"))
            }
            Some(m) => Ok(m.to_vec()),
            None => Ok(full_mask(self.n_pix)),
        }
    }

    fn observe(&mut self, patch: &DVector<f64>, mask: Option<&[bool]>) -> Result<Option<BasisUpdate>> {
        let update = match mask {
            Some(m) => {
                let m = self.resolve_mask(Some(m))?;
                self.subspace.observe_masked(patch, &m, self.params.n_channels)?
            }
            None => self.subspace.observe(patch)?,
        };
        if let Some(u) = &update {
            self.after_basis_update(u)?;
        }
        Ok(update)
    }

    fn after_basis_update(&mut self, update: &BasisUpdate) -> Result<()> {
        if let Some(init) = &self.init_patch {
            self.init_residual = self.subspace.residual(init)?;
        }
        self.reporter.on_basis_update(self.frame, update);
        Ok(())
    }
}

/// Sum of squared residuals over every channel of the selected pixels
fn masked_ssd(residual: &DVector<f64>, mask: &[bool], n_channels: usize) -> f64 {
    mask.iter()
        .enumerate()
        .filter(|&(_, &m)| m)
        .map(|(p, _)| {
            residual
                .rows(p * n_channels, n_channels)
                .iter()
                .map(|r| r * r)
                .sum::<f64>()
        })
        .sum()
}
