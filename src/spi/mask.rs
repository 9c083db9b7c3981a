//! Pixel reliability masks
//!
//! A [`PixelMask`] owns one strategy and one boolean buffer of `n_pix`
//! entries. The strategy is fixed at construction and dispatched by `match`:
//!
//! - [`IntensityDifference`] - reliable while the pixel stays close to the
//!   reference patch, relative to the reference's dynamic range
//! - [`GradientMagnitude`] - reliable while the local gradient is strong
//! - [`GoodFeatureNeighborhood`] - reliable within a square neighborhood of
//!   a detected corner
//!
//! `initialize` records whatever reference state the strategy needs and sets
//! the mask to all-true; `update` recomputes the mask from the current
//! observation without touching that reference state, so repeated calls with
//! the same observation return the same mask.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::{
    GoodFeatureConfig, GradientMagnitudeConfig, IntensityDifferenceConfig, SpiConfig,
};
use super::features::GoodFeatureDetector;
use crate::common::errors::{ensure_len, AppearanceError, Result};

/// Rectangular patch resolution; pixels are flattened row-major
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchLayout {
    /// Width in pixels
    pub resx: usize,
    /// Height in pixels
    pub resy: usize,
}

impl PatchLayout {
    /// Create a layout
    pub fn new(resx: usize, resy: usize) -> Self {
        Self { resx, resy }
    }

    /// Number of pixels
    #[inline]
    pub fn n_pix(&self) -> usize {
        self.resx * self.resy
    }
}

/// One frame's view of a patch as seen by a mask strategy
#[derive(Debug, Clone, Copy)]
pub struct PatchObservation<'a> {
    /// Single-channel intensities, row-major
    pub pixels: &'a DVector<f64>,
    /// Optional `n_pix x 2` gradient; computed from `pixels` when absent
    pub gradients: Option<&'a DMatrix<f64>>,
}

impl<'a> PatchObservation<'a> {
    /// Observation carrying intensities only
    pub fn new(pixels: &'a DVector<f64>) -> Self {
        Self {
            pixels,
            gradients: None,
        }
    }

    /// Attach a gradient supplied by the warping collaborator
    pub fn with_gradients(mut self, gradients: &'a DMatrix<f64>) -> Self {
        self.gradients = Some(gradients);
        self
    }
}

/// All-true mask of the given size
pub fn full_mask(n_pix: usize) -> Vec<bool> {
    vec![true; n_pix]
}

/// Central-difference patch gradient with replicated borders.
///
/// Returns an `n_pix x 2` matrix holding `[dI/dx, dI/dy]` per pixel.
pub fn patch_gradient(pixels: &DVector<f64>, layout: PatchLayout) -> Result<DMatrix<f64>> {
    ensure_len(layout.n_pix(), pixels.len(), "patch pixels")?;
    let PatchLayout { resx, resy } = layout;
    let mut grad = DMatrix::zeros(layout.n_pix(), 2);
    for y in 0..resy {
        for x in 0..resx {
            let left = pixels[y * resx + x.saturating_sub(1)];
            let right = pixels[y * resx + (x + 1).min(resx - 1)];
            let up = pixels[y.saturating_sub(1) * resx + x];
            let down = pixels[(y + 1).min(resy - 1) * resx + x];
            let id = y * resx + x;
            grad[(id, 0)] = 0.5 * (right - left);
            grad[(id, 1)] = 0.5 * (down - up);
        }
    }
    Ok(grad)
}

/// Reliability from the absolute difference to the reference patch
#[derive(Debug, Clone)]
pub struct IntensityDifference {
    config: IntensityDifferenceConfig,
    reference: Option<DVector<f64>>,
    range: f64,
}

impl IntensityDifference {
    /// Create the strategy
    pub fn new(config: IntensityDifferenceConfig) -> Self {
        log::info!(
            "Using Pixel Difference SPI model with: threshold={}",
            config.threshold
        );
        Self {
            config,
            reference: None,
            range: 0.0,
        }
    }

    /// Dynamic range `max - min` of the reference patch
    pub fn range(&self) -> f64 {
        self.range
    }

    fn initialize(&mut self, reference: &PatchObservation<'_>) {
        let pixels = reference.pixels;
        self.range = if pixels.is_empty() {
            0.0
        } else {
            pixels.max() - pixels.min()
        };
        self.reference = Some(pixels.clone());
    }

    fn compute(&mut self, current: &PatchObservation<'_>, out: &mut [bool]) -> Result<()> {
        let reference = self
            .reference
            .as_ref()
            .ok_or_else(|| AppearanceError::not_initialized("IntensityDifference::update"))?;
        let cutoff = self.config.threshold * self.range;
        for ((m, r), c) in out.iter_mut().zip(reference.iter()).zip(current.pixels.iter()) {
            *m = (r - c).abs() < cutoff;
        }
        Ok(())
    }
}

/// Reliability from gradient magnitude
#[derive(Debug, Clone)]
pub struct GradientMagnitude {
    config: GradientMagnitudeConfig,
    initial_mask: Option<Vec<bool>>,
}

impl GradientMagnitude {
    /// Create the strategy
    pub fn new(config: GradientMagnitudeConfig) -> Self {
        log::info!(
            "Using Gradient Magnitude SPI model with: threshold={}, use_union={}",
            config.threshold,
            config.use_union
        );
        Self {
            config,
            initial_mask: None,
        }
    }

    /// Mask computed from the reference observation
    pub fn initial_mask(&self) -> Option<&[bool]> {
        self.initial_mask.as_deref()
    }

    fn threshold_into(
        &self,
        observation: &PatchObservation<'_>,
        layout: PatchLayout,
        out: &mut [bool],
    ) -> Result<()> {
        let computed;
        let grad = match observation.gradients {
            Some(g) => g,
            None => {
                computed = patch_gradient(observation.pixels, layout)?;
                &computed
            }
        };
        ensure_len(layout.n_pix(), grad.nrows(), "gradient rows")?;
        for (pix_id, m) in out.iter_mut().enumerate() {
            *m = grad.row(pix_id).norm() > self.config.threshold;
        }
        Ok(())
    }

    fn initialize(&mut self, reference: &PatchObservation<'_>, layout: PatchLayout) -> Result<()> {
        let mut initial = vec![false; layout.n_pix()];
        self.threshold_into(reference, layout, &mut initial)?;
        self.initial_mask = Some(initial);
        Ok(())
    }

    fn compute(
        &mut self,
        current: &PatchObservation<'_>,
        layout: PatchLayout,
        out: &mut [bool],
    ) -> Result<()> {
        if self.initial_mask.is_none() {
            return Err(AppearanceError::not_initialized("GradientMagnitude::update"));
        }
        self.threshold_into(current, layout, out)?;
        if self.config.use_union {
            if let Some(initial) = &self.initial_mask {
                union_into(out, initial);
            }
        }
        Ok(())
    }
}

/// Reliability within `neigh_offset` pixels of a detected corner
#[derive(Debug, Clone)]
pub struct GoodFeatureNeighborhood {
    detector: GoodFeatureDetector,
    initial_mask: Option<Vec<bool>>,
}

impl GoodFeatureNeighborhood {
    /// Create the strategy
    pub fn new(config: GoodFeatureConfig) -> Self {
        log::info!(
            "Using Good Features To Track SPI model with: max_corners={}, quality_level={}, \
             min_distance={}, block_size={}, use_harris={}, harris_k={}, use_union={}, neigh_offset={}",
            config.max_corners,
            config.quality_level,
            config.min_distance,
            config.block_size,
            config.use_harris,
            config.harris_k,
            config.use_union,
            config.neigh_offset
        );
        Self {
            detector: GoodFeatureDetector::new(config),
            initial_mask: None,
        }
    }

    /// Mask computed from the reference observation
    pub fn initial_mask(&self) -> Option<&[bool]> {
        self.initial_mask.as_deref()
    }

    fn corner_mask_into(
        &mut self,
        observation: &PatchObservation<'_>,
        layout: PatchLayout,
        out: &mut [bool],
    ) -> Result<()> {
        let corners = self.detector.detect(observation.pixels.as_slice(), layout)?;
        let offset = self.detector.config().neigh_offset;
        out.fill(false);
        for corner in &corners {
            let y_end = (corner.y + offset).min(layout.resy - 1);
            let x_end = (corner.x + offset).min(layout.resx - 1);
            for y in corner.y.saturating_sub(offset)..=y_end {
                let row = y * layout.resx;
                out[row + corner.x.saturating_sub(offset)..=row + x_end].fill(true);
            }
        }
        Ok(())
    }

    fn initialize(&mut self, reference: &PatchObservation<'_>, layout: PatchLayout) -> Result<()> {
        let mut initial = vec![false; layout.n_pix()];
        self.corner_mask_into(reference, layout, &mut initial)?;
        self.initial_mask = Some(initial);
        Ok(())
    }

    fn compute(
        &mut self,
        current: &PatchObservation<'_>,
        layout: PatchLayout,
        out: &mut [bool],
    ) -> Result<()> {
        if self.initial_mask.is_none() {
            return Err(AppearanceError::not_initialized(
                "GoodFeatureNeighborhood::update",
            ));
        }
        self.corner_mask_into(current, layout, out)?;
        if self.detector.config().use_union {
            if let Some(initial) = &self.initial_mask {
                union_into(out, initial);
            }
        }
        Ok(())
    }
}

fn union_into(out: &mut [bool], initial: &[bool]) {
    for (m, &i) in out.iter_mut().zip(initial) {
        *m = *m || i;
    }
}

/// Strategy variants behind [`PixelMask`]
#[derive(Debug, Clone)]
pub enum MaskStrategy {
    /// See [`IntensityDifference`]
    IntensityDifference(IntensityDifference),
    /// See [`GradientMagnitude`]
    GradientMagnitude(GradientMagnitude),
    /// See [`GoodFeatureNeighborhood`]
    GoodFeatureNeighborhood(GoodFeatureNeighborhood),
}

/// A reliability mask together with the strategy that maintains it
#[derive(Debug, Clone)]
pub struct PixelMask {
    layout: PatchLayout,
    strategy: MaskStrategy,
    mask: Vec<bool>,
    initialized: bool,
}

impl PixelMask {
    /// Build a strategy from a validated configuration
    pub fn new(config: SpiConfig, layout: PatchLayout) -> Result<Self> {
        config.validate()?;
        let strategy = match config {
            SpiConfig::IntensityDifference(c) => {
                MaskStrategy::IntensityDifference(IntensityDifference::new(c))
            }
            SpiConfig::GradientMagnitude(c) => {
                MaskStrategy::GradientMagnitude(GradientMagnitude::new(c))
            }
            SpiConfig::GoodFeatureNeighborhood(c) => {
                MaskStrategy::GoodFeatureNeighborhood(GoodFeatureNeighborhood::new(c))
            }
        };
        Ok(Self {
            layout,
            strategy,
            mask: full_mask(layout.n_pix()),
            initialized: false,
        })
    }

    /// Build a strategy by name from positional, loosely typed values.
    ///
    /// `kind` is one of `intensity_difference`, `gradient_magnitude` or
    /// `good_feature_neighborhood`.
    pub fn from_values(kind: &str, values: &[Value], layout: PatchLayout) -> Result<Self> {
        let config = match kind {
            "intensity_difference" => {
                SpiConfig::IntensityDifference(IntensityDifferenceConfig::from_values(values)?)
            }
            "gradient_magnitude" => {
                SpiConfig::GradientMagnitude(GradientMagnitudeConfig::from_values(values)?)
            }
            "good_feature_neighborhood" => {
                SpiConfig::GoodFeatureNeighborhood(GoodFeatureConfig::from_values(values)?)
            }
            other => {
                return Err(AppearanceError::config(format!(
                    "unknown SPI strategy '{}'",
                    other
                )))
            }
        };
        Self::new(config, layout)
    }

    /// Strategy name
    pub fn name(&self) -> &'static str {
        match &self.strategy {
            MaskStrategy::IntensityDifference(_) => "IntensityDifference",
            MaskStrategy::GradientMagnitude(_) => "GradientMagnitude",
            MaskStrategy::GoodFeatureNeighborhood(_) => "GoodFeatureNeighborhood",
        }
    }

    /// Underlying strategy
    pub fn strategy(&self) -> &MaskStrategy {
        &self.strategy
    }

    /// Patch resolution the mask is sized for
    pub fn layout(&self) -> PatchLayout {
        self.layout
    }

    /// Mask length
    pub fn n_pix(&self) -> usize {
        self.mask.len()
    }

    /// Current mask
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Whether `initialize` has run for the current layout
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Change the patch resolution; the strategy must be re-initialized
    pub fn set_layout(&mut self, layout: PatchLayout) {
        if layout == self.layout {
            return;
        }
        self.layout = layout;
        self.mask = full_mask(layout.n_pix());
        self.initialized = false;
    }

    fn check_observation(&self, observation: &PatchObservation<'_>) -> Result<()> {
        ensure_len(self.layout.n_pix(), observation.pixels.len(), "patch")?;
        if let Some(g) = observation.gradients {
            ensure_len(self.layout.n_pix(), g.nrows(), "gradient rows")?;
        }
        Ok(())
    }

    /// Record reference state from the first frame and reset the mask to all-true
    pub fn initialize(&mut self, reference: &PatchObservation<'_>) -> Result<()> {
        self.check_observation(reference)?;
        let layout = self.layout;
        match &mut self.strategy {
            MaskStrategy::IntensityDifference(s) => s.initialize(reference),
            MaskStrategy::GradientMagnitude(s) => s.initialize(reference, layout)?,
            MaskStrategy::GoodFeatureNeighborhood(s) => s.initialize(reference, layout)?,
        }
        self.mask.fill(true);
        self.initialized = true;
        Ok(())
    }

    /// Recompute the mask for the current observation.
    ///
    /// On error the previous mask is left in place.
    pub fn update(&mut self, current: &PatchObservation<'_>) -> Result<&[bool]> {
        if !self.initialized {
            return Err(AppearanceError::not_initialized(format!(
                "{}::update",
                self.name()
            )));
        }
        self.check_observation(current)?;
        let layout = self.layout;
        let mut next = vec![false; layout.n_pix()];
        match &mut self.strategy {
            MaskStrategy::IntensityDifference(s) => s.compute(current, &mut next)?,
            MaskStrategy::GradientMagnitude(s) => s.compute(current, layout, &mut next)?,
            MaskStrategy::GoodFeatureNeighborhood(s) => s.compute(current, layout, &mut next)?,
        }
        self.mask = next;
        log::trace!(
            "{} mask: {}/{} pixels reliable",
            self.name(),
            super::reduce::masked_count(&self.mask),
            self.mask.len()
        );
        Ok(&self.mask)
    }
}
