//! Auto-enhance estimation and the brightness/contrast bake.
//!
//! ## Estimation
//!
//! Per pixel, luminance is `L = 0.299R + 0.587G + 0.114B` (BT.601, alpha
//! ignored), scaled to `[0, 1]`. Over the whole surface we take the mean `μ`
//! and the population standard deviation `σ`, then
//!
//! ```text
//! brightness = clamp(target_mean / μ)
//! contrast   = clamp(target_std  / σ)
//! ```
//!
//! A zero `μ` (all black) or zero `σ` (one flat colour) has no finite
//! ratio; the factor is pinned to the upper bound instead.
//!
//! ## Bake
//!
//! [`bake`] applies the same arithmetic a CSS `brightness(b) contrast(c)`
//! filter performs, brightness first, clamping to `[0, 255]` after each
//! step. The live preview and the committed bytes therefore agree on
//! what a given pair of factors means.

use crate::config::EnhanceTargets;
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Statistics below this are float noise, not signal (1/255 is one step).
const DEGENERATE: f64 = 1e-9;

/// Mean and standard deviation of luminance, both normalised to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LuminanceStats {
    pub mean: f64,
    pub std_dev: f64,
    pub pixels: u64,
}

/// Brightness/contrast multipliers. `1.0` leaves a channel unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorAdjust {
    pub brightness: f64,
    pub contrast: f64,
}

impl Default for ColorAdjust {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ColorAdjust {
    pub const IDENTITY: ColorAdjust = ColorAdjust {
        brightness: 1.0,
        contrast: 1.0,
    };

    pub fn is_identity(&self) -> bool {
        self.brightness == 1.0 && self.contrast == 1.0
    }

    /// CSS filter string used for the live preview.
    pub fn css(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ColorAdjust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "brightness({}) contrast({})",
            trim_float(self.brightness),
            trim_float(self.contrast)
        )
    }
}

fn trim_float(v: f64) -> String {
    let s = format!("{:.3}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

/// BT.601 luma of one pixel in `[0, 1]`.
fn luminance(p: &Rgba<u8>) -> f64 {
    (0.299 * p.0[0] as f64 + 0.587 * p.0[1] as f64 + 0.114 * p.0[2] as f64) / 255.0
}

/// Compute luminance statistics over every pixel of `img`.
///
/// An empty image reports zero mean and zero deviation.
pub fn luminance_stats(img: &RgbaImage) -> LuminanceStats {
    let count = img.width() as u64 * img.height() as u64;
    if count == 0 {
        return LuminanceStats {
            mean: 0.0,
            std_dev: 0.0,
            pixels: 0,
        };
    }

    // Two passes: a flat surface must report exactly zero deviation.
    let mean = img.pixels().map(luminance).sum::<f64>() / count as f64;
    let variance = img
        .pixels()
        .map(|p| {
            let d = luminance(p) - mean;
            d * d
        })
        .sum::<f64>()
        / count as f64;

    LuminanceStats {
        mean,
        std_dev: variance.sqrt(),
        pixels: count,
    }
}

/// Factor that moves `observed` to `target`, clamped to `bounds`.
///
/// Degenerate observations (zero, negative, NaN) pin to the upper bound.
pub fn correction_factor(target: f64, observed: f64, bounds: (f64, f64)) -> f64 {
    if !(observed > DEGENERATE) {
        return bounds.1;
    }
    (target / observed).clamp(bounds.0, bounds.1)
}

/// Estimate the brightness/contrast pair for `img`.
pub fn estimate(img: &RgbaImage, targets: &EnhanceTargets, bounds: (f64, f64)) -> ColorAdjust {
    let stats = luminance_stats(img);
    estimate_from_stats(&stats, targets, bounds)
}

/// Same as [`estimate`] for already-computed statistics.
pub fn estimate_from_stats(
    stats: &LuminanceStats,
    targets: &EnhanceTargets,
    bounds: (f64, f64),
) -> ColorAdjust {
    ColorAdjust {
        brightness: correction_factor(targets.mean, stats.mean, bounds),
        contrast: correction_factor(targets.std_dev, stats.std_dev, bounds),
    }
}

/// Build the 256-entry channel lookup table for `adj`.
fn lookup_table(adj: ColorAdjust) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (v, out) in lut.iter_mut().enumerate() {
        let b = (v as f64 * adj.brightness).clamp(0.0, 255.0);
        let c = ((b - 127.5) * adj.contrast + 127.5).clamp(0.0, 255.0);
        *out = c.round() as u8;
    }
    lut
}

/// Apply `adj` to every colour channel of `img`. Alpha is untouched.
pub fn bake(img: &DynamicImage, adj: ColorAdjust) -> DynamicImage {
    if adj.is_identity() {
        return img.clone();
    }
    let lut = lookup_table(adj);
    let mut rgba = img.to_rgba8();
    for p in rgba.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
        p.0[1] = lut[p.0[1] as usize];
        p.0[2] = lut[p.0[2] as usize];
    }
    DynamicImage::ImageRgba8(rgba)
}
