/*!
# ivt-appearance - Incremental subspace appearance model

Online-adaptive appearance model for visual object tracking, with
selective pixel integration (SPI).

## Features

- Low-rank eigenbasis of patch appearance refreshed with the Sequential
  Karhunen-Loeve transform with mean update (SKLM)
- Per-pixel reliability masks from intensity differences, gradient
  magnitudes or good-feature neighbourhoods
- Masked reductions (mean, Jacobian-weighted sums) that skip unreliable pixels

## Modules

- [`subspace`] - Incremental eigenbasis and the SKLM step
- [`spi`] - Pixel-mask strategies and masked reductions
- [`appearance`] - Per-frame protocol driven by an optimizer
- [`reporter`] - Observability hooks
- [`common`] - Errors, constants, linear algebra helpers

## Example

```rust
use ivt_appearance::{PcaAppearanceModel, PcaParams, SubspaceConfig};
use nalgebra::DVector;

let params = PcaParams {
    subspace: SubspaceConfig::new(8, 3, 0.95),
    n_channels: 1,
};
let mut model = PcaAppearanceModel::new(params).unwrap();
model.initialize(&DVector::from_element(16, 100.0)).unwrap();

for frame in 0..3 {
    model.set_first_iter();
    let patch = DVector::from_element(16, 100.0 + frame as f64);
    let likelihood = model.update_similarity(&patch, None).unwrap();
    assert!((0.0..=1.0).contains(&likelihood));
    model.clear_first_iter().unwrap();
}
assert!(model.subspace().is_available());
```
*/

// ============================================================================
// Core modules
// ============================================================================

/// Errors, constants and linear algebra helpers
pub mod common;

/// Selective pixel integration: reliability masks and masked reductions
pub mod spi;

/// Incremental eigenbasis (SKLM)
pub mod subspace;

/// Appearance model facade
pub mod appearance;

/// Observability hooks
pub mod reporter;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// Errors
pub use common::errors::{AppearanceError, Result};

// Subspace
pub use subspace::{
    sklm, BasisUpdate, IncrementalSubspace, SklmOutput, SubspaceConfig, SubspaceSnapshot,
    SubspaceState,
};

// Pixel masks
pub use spi::{
    full_mask, patch_gradient, Corner, GoodFeatureConfig, GoodFeatureDetector,
    GradientMagnitudeConfig, IntensityDifferenceConfig, MaskStrategy, PatchLayout,
    PatchObservation, PixelMask, SpiConfig,
};

// Masked reductions
pub use spi::{
    downsample_mask, masked_col_mean, masked_count, masked_difference_of_weighted_sums,
    masked_mean, masked_row_mean, masked_weighted_sum, upsample_mask,
};

// Facade
pub use appearance::{PcaAppearanceModel, PcaParams};

// Reporters
pub use reporter::{DebugReporter, LoggingReporter, ModelReporter, NoOpReporter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
