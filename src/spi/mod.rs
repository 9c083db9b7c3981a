//! Selective pixel integration (SPI)
//!
//! Per-pixel reliability masks and the masked reductions that every
//! statistic and gradient over a patch must use.
//!
//! - [`PixelMask`] - one mask buffer plus the strategy that maintains it
//! - [`GoodFeatureDetector`] - corner detector behind the neighborhood strategy
//! - [`reduce`] - masked mean / weighted sum / difference primitives and
//!   pyramid mask resampling

pub mod config;
pub mod features;
pub mod mask;
pub mod reduce;

pub use config::{GoodFeatureConfig, GradientMagnitudeConfig, IntensityDifferenceConfig, SpiConfig};
pub use features::{Corner, GoodFeatureDetector};
pub use mask::{
    full_mask, patch_gradient, GoodFeatureNeighborhood, GradientMagnitude, IntensityDifference,
    MaskStrategy, PatchLayout, PatchObservation, PixelMask,
};
pub use reduce::{
    downsample_mask, masked_col_mean, masked_count, masked_difference_of_weighted_sums,
    masked_mean, masked_row_mean, masked_weighted_sum, upsample_mask,
};
