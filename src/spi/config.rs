//! Configuration types for pixel-mask strategies
//!
//! Each strategy has its own strongly typed record, validated once when the
//! strategy is built. Loosely typed parameter lists (as produced by a setup
//! file or a scripting front end) enter through `from_values`, which enforces
//! the exact arity and the JSON type of every position before any value is
//! used. An empty list selects the defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::constants::{
    DEFAULT_GFTT_BLOCK_SIZE, DEFAULT_GFTT_HARRIS_K, DEFAULT_GFTT_MAX_CORNERS,
    DEFAULT_GFTT_MIN_DISTANCE, DEFAULT_GFTT_QUALITY_LEVEL, DEFAULT_GRAD_THRESHOLD,
    DEFAULT_PIX_DIFF_THRESHOLD,
};
use crate::common::errors::{AppearanceError, Result};

fn parse_f64(value: &Value, name: &str, strategy: &str) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        AppearanceError::config(format!(
            "spi::{} :: invalid parameter type provided for {} (expected number, got {})",
            strategy, name, value
        ))
    })
}

fn parse_usize(value: &Value, name: &str, strategy: &str) -> Result<usize> {
    value
        .as_u64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| {
            AppearanceError::config(format!(
                "spi::{} :: invalid parameter type provided for {} (expected non-negative integer, got {})",
                strategy, name, value
            ))
        })
}

fn parse_bool(value: &Value, name: &str, strategy: &str) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        AppearanceError::config(format!(
            "spi::{} :: invalid parameter type provided for {} (expected bool, got {})",
            strategy, name, value
        ))
    })
}

fn check_arity(values: &[Value], expected: usize, strategy: &str) -> Result<()> {
    if values.len() != expected {
        let noun = if expected == 1 { "argument" } else { "arguments" };
        return Err(AppearanceError::config(format!(
            "spi::{} needs exactly {} input {}, got {}",
            strategy,
            expected,
            noun,
            values.len()
        )));
    }
    Ok(())
}

fn check_non_negative(value: f64, name: &str, strategy: &str) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(AppearanceError::config(format!(
            "spi::{} :: {} must be finite and non-negative, got {}",
            strategy, name, value
        )));
    }
    Ok(())
}

/// Pixel-difference strategy parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntensityDifferenceConfig {
    /// A pixel is reliable while `|ref - curr| < threshold * range(ref)`
    pub threshold: f64,
}

impl Default for IntensityDifferenceConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_PIX_DIFF_THRESHOLD,
        }
    }
}

impl IntensityDifferenceConfig {
    const NAME: &'static str = "IntensityDifference";

    /// Parse `[threshold]`, or defaults for an empty list
    pub fn from_values(values: &[Value]) -> Result<Self> {
        if values.is_empty() {
            return Ok(Self::default());
        }
        check_arity(values, 1, Self::NAME)?;
        let config = Self {
            threshold: parse_f64(&values[0], "threshold", Self::NAME)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        check_non_negative(self.threshold, "threshold", Self::NAME)
    }
}

/// Gradient-magnitude strategy parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GradientMagnitudeConfig {
    /// A pixel is reliable while `||grad|| > threshold`
    pub threshold: f64,
    /// OR every update with the mask computed at initialization
    pub use_union: bool,
}

impl Default for GradientMagnitudeConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_GRAD_THRESHOLD,
            use_union: false,
        }
    }
}

impl GradientMagnitudeConfig {
    const NAME: &'static str = "GradientMagnitude";

    /// Parse `[threshold, use_union]`, or defaults for an empty list
    pub fn from_values(values: &[Value]) -> Result<Self> {
        if values.is_empty() {
            return Ok(Self::default());
        }
        check_arity(values, 2, Self::NAME)?;
        let config = Self {
            threshold: parse_f64(&values[0], "threshold", Self::NAME)?,
            use_union: parse_bool(&values[1], "use_union", Self::NAME)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        check_non_negative(self.threshold, "threshold", Self::NAME)
    }
}

/// Good-features-to-track neighborhood strategy parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoodFeatureConfig {
    /// Maximum corners kept per detection (0 keeps all)
    pub max_corners: usize,
    /// Corners weaker than `quality_level * strongest` are rejected
    pub quality_level: f64,
    /// Minimum Euclidean distance between accepted corners
    pub min_distance: f64,
    /// Side length of the structure-tensor window
    pub block_size: usize,
    /// Harris response instead of the minimum eigenvalue
    pub use_harris: bool,
    /// Harris free parameter
    pub harris_k: f64,
    /// OR every update with the mask computed at initialization
    pub use_union: bool,
    /// Half-size of the square neighborhood marked around each corner
    pub neigh_offset: usize,
}

impl Default for GoodFeatureConfig {
    fn default() -> Self {
        Self {
            max_corners: DEFAULT_GFTT_MAX_CORNERS,
            quality_level: DEFAULT_GFTT_QUALITY_LEVEL,
            min_distance: DEFAULT_GFTT_MIN_DISTANCE,
            block_size: DEFAULT_GFTT_BLOCK_SIZE,
            use_harris: false,
            harris_k: DEFAULT_GFTT_HARRIS_K,
            use_union: false,
            neigh_offset: 0,
        }
    }
}

impl GoodFeatureConfig {
    const NAME: &'static str = "GoodFeatureNeighborhood";

    /// Parse the eight positional values
    /// `[max_corners, quality_level, min_distance, block_size, use_harris,
    /// harris_k, use_union, neigh_offset]`, or defaults for an empty list.
    pub fn from_values(values: &[Value]) -> Result<Self> {
        if values.is_empty() {
            return Ok(Self::default());
        }
        check_arity(values, 8, Self::NAME)?;
        let config = Self {
            max_corners: parse_usize(&values[0], "max_corners", Self::NAME)?,
            quality_level: parse_f64(&values[1], "quality_level", Self::NAME)?,
            min_distance: parse_f64(&values[2], "min_distance", Self::NAME)?,
            block_size: parse_usize(&values[3], "block_size", Self::NAME)?,
            use_harris: parse_bool(&values[4], "use_harris", Self::NAME)?,
            harris_k: parse_f64(&values[5], "harris_k", Self::NAME)?,
            use_union: parse_bool(&values[6], "use_union", Self::NAME)?,
            neigh_offset: parse_usize(&values[7], "neigh_offset", Self::NAME)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.quality_level > 0.0 && self.quality_level <= 1.0) {
            return Err(AppearanceError::config(format!(
                "spi::{} :: quality_level must lie in (0, 1], got {}",
                Self::NAME,
                self.quality_level
            )));
        }
        check_non_negative(self.min_distance, "min_distance", Self::NAME)?;
        check_non_negative(self.harris_k, "harris_k", Self::NAME)?;
        if self.block_size == 0 {
            return Err(AppearanceError::config(format!(
                "spi::{} :: block_size must be at least 1",
                Self::NAME
            )));
        }
        Ok(())
    }
}

/// Strategy selection with its parameters
///
/// Serialized with an explicit `type` tag, e.g.
/// `{"type": "gradient_magnitude", "threshold": 0.01, "use_union": true}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpiConfig {
    /// Reliability from the difference to the reference patch
    IntensityDifference(IntensityDifferenceConfig),
    /// Reliability from gradient magnitude
    GradientMagnitude(GradientMagnitudeConfig),
    /// Reliability from the neighborhood of detected corners
    GoodFeatureNeighborhood(GoodFeatureConfig),
}

impl SpiConfig {
    /// Strategy name as used in log messages
    pub fn name(&self) -> &'static str {
        match self {
            SpiConfig::IntensityDifference(_) => IntensityDifferenceConfig::NAME,
            SpiConfig::GradientMagnitude(_) => GradientMagnitudeConfig::NAME,
            SpiConfig::GoodFeatureNeighborhood(_) => GoodFeatureConfig::NAME,
        }
    }

    /// Check value ranges of the wrapped record
    pub fn validate(&self) -> Result<()> {
        match self {
            SpiConfig::IntensityDifference(c) => c.validate(),
            SpiConfig::GradientMagnitude(c) => c.validate(),
            SpiConfig::GoodFeatureNeighborhood(c) => c.validate(),
        }
    }

    /// Parse a tagged JSON object, rejecting unknown or missing fields
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AppearanceError::config(format!("spi config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Serialize to pretty-printed JSON string.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
