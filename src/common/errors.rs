//! Error types for the appearance model and pixel-mask strategies
//!
//! Degenerate masks are deliberately absent: a masked reduction over an empty
//! mask yields NaN and callers are expected to test for it.

use thiserror::Error;

/// Errors raised by configuration, masking and subspace operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppearanceError {
    /// Wrong parameter count, wrong parameter type or out-of-range value
    #[error("Invalid configuration: {description}")]
    InvalidConfiguration {
        /// Description of the offending parameter
        description: String,
    },

    /// Input size inconsistent with the size the instance was set up for
    #[error("Dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was expected
        expected: usize,
        /// What was received
        actual: usize,
        /// Which input was inspected (e.g. "patch", "mask", "jacobian rows")
        context: String,
    },

    /// Operation requires a prior `initialize` call
    #[error("{context} called before initialize")]
    NotInitialized {
        /// Name of the rejected operation
        context: String,
    },
}

impl AppearanceError {
    pub(crate) fn config(description: impl Into<String>) -> Self {
        AppearanceError::InvalidConfiguration {
            description: description.into(),
        }
    }

    pub(crate) fn dimension(expected: usize, actual: usize, context: impl Into<String>) -> Self {
        AppearanceError::DimensionMismatch {
            expected,
            actual,
            context: context.into(),
        }
    }

    pub(crate) fn not_initialized(context: impl Into<String>) -> Self {
        AppearanceError::NotInitialized {
            context: context.into(),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AppearanceError>;

/// Fail with `DimensionMismatch` unless `actual == expected`.
#[inline]
pub(crate) fn ensure_len(expected: usize, actual: usize, context: &str) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(AppearanceError::dimension(expected, actual, context))
    }
}
