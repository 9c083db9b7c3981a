//! Good-features-to-track corner detection on a patch.
//!
//! Algorithm:
//!   1. Sobel gradients Ix, Iy with replicated borders
//!   2. Structure tensor M = [[Sxx, Sxy], [Sxy, Syy]] summed over a
//!      `block_size x block_size` window
//!   3. Response: min eigenvalue of M, or `det(M) - k * trace(M)^2` (Harris)
//!   4. Keep 3x3 local maxima whose response exceeds
//!      `quality_level * max response`
//!   5. Walk candidates strongest first, rejecting any closer than
//!      `min_distance` to one already accepted, up to `max_corners`
//!
//! The detector owns its gradient and response buffers. They are reused
//! across calls and only reallocated when the patch resolution changes.

use super::config::GoodFeatureConfig;
use super::mask::PatchLayout;
use crate::common::errors::{ensure_len, Result};

/// A detected corner in patch coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    /// Column index
    pub x: usize,
    /// Row index
    pub y: usize,
    /// Corner response (min eigenvalue or Harris score)
    pub response: f64,
}

/// Corner detector with an owned scratch buffer
#[derive(Debug, Clone)]
pub struct GoodFeatureDetector {
    config: GoodFeatureConfig,
    layout: PatchLayout,
    grad_x: Vec<f64>,
    grad_y: Vec<f64>,
    response: Vec<f64>,
}

impl GoodFeatureDetector {
    /// Create a detector; buffers are sized on first use
    pub fn new(config: GoodFeatureConfig) -> Self {
        Self {
            config,
            layout: PatchLayout::new(0, 0),
            grad_x: Vec::new(),
            grad_y: Vec::new(),
            response: Vec::new(),
        }
    }

    /// Detector parameters
    pub fn config(&self) -> &GoodFeatureConfig {
        &self.config
    }

    fn ensure_scratch(&mut self, layout: PatchLayout) {
        if self.layout == layout {
            return;
        }
        let n_pix = layout.n_pix();
        self.layout = layout;
        self.grad_x.resize(n_pix, 0.0);
        self.grad_y.resize(n_pix, 0.0);
        self.response.resize(n_pix, 0.0);
    }

    /// Detect corners in a row-major patch with the given layout.
    ///
    /// Corners come back strongest first.
    pub fn detect(&mut self, pixels: &[f64], layout: PatchLayout) -> Result<Vec<Corner>> {
        ensure_len(layout.n_pix(), pixels.len(), "patch pixels")?;
        if layout.n_pix() == 0 {
            return Ok(Vec::new());
        }
        self.ensure_scratch(layout);
        self.compute_gradients(pixels);
        let max_response = self.compute_response();
        if !(max_response > 0.0) {
            log::debug!("n_good_features: 0 (flat patch)");
            return Ok(Vec::new());
        }

        let threshold = max_response * self.config.quality_level;
        let mut candidates = self.local_maxima(threshold);
        // Stable sort: equal responses keep raster order
        candidates.sort_by(|a, b| {
            b.response
                .partial_cmp(&a.response)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let corners = self.enforce_min_distance(candidates);
        log::debug!("n_good_features: {}", corners.len());
        Ok(corners)
    }

    fn compute_gradients(&mut self, pixels: &[f64]) {
        let PatchLayout { resx, resy } = self.layout;
        let at = |x: isize, y: isize| -> f64 {
            let cx = x.clamp(0, resx as isize - 1) as usize;
            let cy = y.clamp(0, resy as isize - 1) as usize;
            pixels[cy * resx + cx]
        };
        for y in 0..resy {
            for x in 0..resx {
                let (xi, yi) = (x as isize, y as isize);
                let gx = (at(xi + 1, yi - 1) + 2.0 * at(xi + 1, yi) + at(xi + 1, yi + 1))
                    - (at(xi - 1, yi - 1) + 2.0 * at(xi - 1, yi) + at(xi - 1, yi + 1));
                let gy = (at(xi - 1, yi + 1) + 2.0 * at(xi, yi + 1) + at(xi + 1, yi + 1))
                    - (at(xi - 1, yi - 1) + 2.0 * at(xi, yi - 1) + at(xi + 1, yi - 1));
                self.grad_x[y * resx + x] = gx;
                self.grad_y[y * resx + x] = gy;
            }
        }
    }

    /// Fill the response map and return its maximum
    fn compute_response(&mut self) -> f64 {
        let PatchLayout { resx, resy } = self.layout;
        let block = self.config.block_size as isize;
        let lo = -(block / 2);
        let hi = lo + block - 1;
        let k = self.config.harris_k;
        let use_harris = self.config.use_harris;

        let mut max_response = f64::NEG_INFINITY;
        for y in 0..resy {
            for x in 0..resx {
                let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
                for dy in lo..=hi {
                    let cy = (y as isize + dy).clamp(0, resy as isize - 1) as usize;
                    for dx in lo..=hi {
                        let cx = (x as isize + dx).clamp(0, resx as isize - 1) as usize;
                        let gx = self.grad_x[cy * resx + cx];
                        let gy = self.grad_y[cy * resx + cx];
                        sxx += gx * gx;
                        syy += gy * gy;
                        sxy += gx * gy;
                    }
                }
                let r = if use_harris {
                    let trace = sxx + syy;
                    sxx * syy - sxy * sxy - k * trace * trace
                } else {
                    let half_diff = 0.5 * (sxx - syy);
                    0.5 * (sxx + syy) - (half_diff * half_diff + sxy * sxy).sqrt()
                };
                self.response[y * resx + x] = r;
                max_response = max_response.max(r);
            }
        }
        max_response
    }

    fn local_maxima(&self, threshold: f64) -> Vec<Corner> {
        let PatchLayout { resx, resy } = self.layout;
        let mut candidates = Vec::new();
        for y in 0..resy {
            for x in 0..resx {
                let r = self.response[y * resx + x];
                if r <= threshold {
                    continue;
                }
                let y0 = y.saturating_sub(1);
                let x0 = x.saturating_sub(1);
                let is_peak = (y0..=(y + 1).min(resy - 1)).all(|ny| {
                    (x0..=(x + 1).min(resx - 1)).all(|nx| self.response[ny * resx + nx] <= r)
                });
                if is_peak {
                    candidates.push(Corner { x, y, response: r });
                }
            }
        }
        candidates
    }

    fn enforce_min_distance(&self, candidates: Vec<Corner>) -> Vec<Corner> {
        let min_dist_sq = self.config.min_distance * self.config.min_distance;
        let cap = if self.config.max_corners == 0 {
            usize::MAX
        } else {
            self.config.max_corners
        };

        let mut accepted: Vec<Corner> = Vec::new();
        for c in candidates {
            if accepted.len() >= cap {
                break;
            }
            let too_close = accepted.iter().any(|a| {
                let dx = a.x as f64 - c.x as f64;
                let dy = a.y as f64 - c.y as f64;
                dx * dx + dy * dy < min_dist_sq
            });
            if !too_close {
                accepted.push(c);
            }
        }
        accepted
    }
}
