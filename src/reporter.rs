//! Observability for the appearance model.
//!
//! The [`ModelReporter`] trait receives callbacks at key points of the
//! per-frame protocol without touching the numeric code paths.
//!
//! The default [`NoOpReporter`] has empty callbacks that compile away.
//!
//! # Example
//!
//! ```
//! use ivt_appearance::{DebugReporter, ModelReporter};
//!
//! let mut reporter = DebugReporter::new();
//! reporter.on_observation(0, 0.8);
//! reporter.on_frame_complete(0);
//! assert_eq!(reporter.observation_events().len(), 1);
//! ```

use crate::subspace::BasisUpdate;

// ============================================================================
// ModelReporter Trait
// ============================================================================

/// Callbacks issued by [`crate::PcaAppearanceModel`].
///
/// All methods default to no-ops; override only the events you need.
/// Callbacks take `&mut self`, so reporters need not be `Send + Sync`.
pub trait ModelReporter {
    /// Called once the model has been seeded with its reference patch.
    fn on_initialize(&mut self, _dim: usize, _n_channels: usize) {}

    /// Called after every similarity evaluation.
    fn on_observation(&mut self, _frame: usize, _likelihood: f64) {}

    /// Called after the eigenbasis has been refreshed.
    fn on_basis_update(&mut self, _frame: usize, _update: &BasisUpdate) {}

    /// Called when a frame's iterations are finished.
    fn on_frame_complete(&mut self, _frame: usize) {}

    /// Called when a mask selects no pixel at all.
    fn on_degenerate_mask(&mut self, _frame: usize, _context: &str) {}
}

// ============================================================================
// NoOpReporter
// ============================================================================

/// Reporter that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReporter;

impl NoOpReporter {
    pub fn new() -> Self {
        Self
    }
}

impl ModelReporter for NoOpReporter {}

// ============================================================================
// DebugReporter
// ============================================================================

/// Reporter that records every event for later inspection.
#[derive(Debug, Clone, Default)]
pub struct DebugReporter {
    initializations: Vec<(usize, usize)>,
    observations: Vec<(usize, f64)>,
    basis_updates: Vec<(usize, BasisUpdate)>,
    frames_completed: Vec<usize>,
    degenerate_masks: Vec<(usize, String)>,
}

impl DebugReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all captured events.
    pub fn clear(&mut self) {
        self.initializations.clear();
        self.observations.clear();
        self.basis_updates.clear();
        self.frames_completed.clear();
        self.degenerate_masks.clear();
    }

    /// `(dim, n_channels)` per initialization
    pub fn initialize_events(&self) -> &[(usize, usize)] {
        &self.initializations
    }

    /// `(frame, likelihood)` per similarity evaluation
    pub fn observation_events(&self) -> &[(usize, f64)] {
        &self.observations
    }

    pub fn basis_update_events(&self) -> &[(usize, BasisUpdate)] {
        &self.basis_updates
    }

    pub fn frame_complete_events(&self) -> &[usize] {
        &self.frames_completed
    }

    pub fn degenerate_mask_events(&self) -> &[(usize, String)] {
        &self.degenerate_masks
    }

    /// Total number of captured events across all kinds.
    pub fn total_events(&self) -> usize {
        self.initializations.len()
            + self.observations.len()
            + self.basis_updates.len()
            + self.frames_completed.len()
            + self.degenerate_masks.len()
    }
}

impl ModelReporter for DebugReporter {
    fn on_initialize(&mut self, dim: usize, n_channels: usize) {
        self.initializations.push((dim, n_channels));
    }

    fn on_observation(&mut self, frame: usize, likelihood: f64) {
        self.observations.push((frame, likelihood));
    }

    fn on_basis_update(&mut self, frame: usize, update: &BasisUpdate) {
        self.basis_updates.push((frame, *update));
    }

    fn on_frame_complete(&mut self, frame: usize) {
        self.frames_completed.push(frame);
    }

    fn on_degenerate_mask(&mut self, frame: usize, context: &str) {
        self.degenerate_masks.push((frame, context.to_string()));
    }
}

// ============================================================================
// LoggingReporter
// ============================================================================

/// Reporter that forwards events to the `log` crate.
///
/// Basis updates and frame completion log at INFO, initialization at DEBUG,
/// per-iteration observations at TRACE and empty masks at WARN.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingReporter {
    verbose: bool,
}

impl LoggingReporter {
    pub fn new() -> Self {
        Self { verbose: false }
    }

    /// Also log each basis update's singular value and observation count.
    pub fn verbose() -> Self {
        Self { verbose: true }
    }
}

impl ModelReporter for LoggingReporter {
    fn on_initialize(&mut self, dim: usize, n_channels: usize) {
        log::debug!("Appearance model initialized: dim={}, channels={}", dim, n_channels);
    }

    fn on_observation(&mut self, frame: usize, likelihood: f64) {
        log::trace!("Frame {}: likelihood={:.6}", frame, likelihood);
    }

    fn on_basis_update(&mut self, frame: usize, update: &BasisUpdate) {
        log::info!("Frame {}: basis update, rank={}", frame, update.rank);
        if self.verbose {
            log::debug!(
                "  batch={}, sigma_max={:?}, n={:.3}",
                update.batch_len,
                update.leading_sigma,
                update.n_observations
            );
        }
    }

    fn on_frame_complete(&mut self, frame: usize) {
        log::info!("Frame {} complete", frame);
    }

    fn on_degenerate_mask(&mut self, frame: usize, context: &str) {
        log::warn!("Frame {}: empty mask in {}", frame, context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update() -> BasisUpdate {
        BasisUpdate {
            batch_len: 5,
            rank: 2,
            leading_sigma: Some(3.0),
            n_observations: 6.0,
        }
    }

    #[test]
    fn test_noop_reporter_accepts_all_events() {
        let mut reporter = NoOpReporter::new();
        reporter.on_initialize(16, 1);
        reporter.on_observation(0, 1.0);
        reporter.on_basis_update(0, &update());
        reporter.on_frame_complete(0);
        reporter.on_degenerate_mask(0, "likelihood");
    }

    #[test]
    fn test_debug_reporter_captures_and_clears() {
        let mut reporter = DebugReporter::new();
        reporter.on_initialize(16, 1);
        reporter.on_observation(0, 0.5);
        reporter.on_observation(0, 0.7);
        reporter.on_basis_update(1, &update());
        reporter.on_frame_complete(1);
        reporter.on_degenerate_mask(2, "curr_grad");

        assert_eq!(reporter.initialize_events(), &[(16, 1)]);
        assert_eq!(reporter.observation_events().len(), 2);
        assert_eq!(reporter.basis_update_events()[0].1.rank, 2);
        assert_eq!(reporter.frame_complete_events(), &[1]);
        assert_eq!(reporter.degenerate_mask_events()[0].1, "curr_grad");
        assert_eq!(reporter.total_events(), 6);

        reporter.clear();
        assert_eq!(reporter.total_events(), 0);
    }

    #[test]
    fn test_logging_reporter_runs_without_logger() {
        let mut reporter = LoggingReporter::verbose();
        reporter.on_initialize(4, 3);
        reporter.on_basis_update(0, &update());
        reporter.on_degenerate_mask(0, "likelihood");
    }
}
