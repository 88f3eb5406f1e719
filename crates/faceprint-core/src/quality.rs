//! Image quality heuristics for face regions.
//!
//! Sharpness, brightness, contrast, dynamic range and exposure are reduced
//! to one hand-tuned score in [0, 1]. Scoring never fails: any problem with
//! the region yields a fixed fallback so downstream stages always get a
//! usable number.

use crate::types::BoundingBox;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Normalizers for the four sub-scores ---
const SHARPNESS_SCALE: f64 = 200.0;
const BRIGHTNESS_PEAK: f64 = 125.0;
const CONTRAST_SCALE: f64 = 60.0;
const DYNAMIC_RANGE_SCALE: f64 = 200.0;

const SHARPNESS_WEIGHT: f64 = 0.3;
const BRIGHTNESS_WEIGHT: f64 = 0.25;
const CONTRAST_WEIGHT: f64 = 0.25;
const DYNAMIC_RANGE_WEIGHT: f64 = 0.2;

/// Pixels below this intensity count as underexposed (bottom 50 bins).
const UNDEREXPOSED_BELOW: u8 = 50;
/// Pixels at or above this intensity count as overexposed (top 56 bins).
const OVEREXPOSED_FROM: u8 = 200;
const EXPOSURE_PENALTY: f64 = 2.0;

const FALLBACK_QUALITY_SCORE: f32 = 0.3;
pub const DEFAULT_GOOD_QUALITY_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum QualityError {
    #[error("region too small for edge analysis: {width}x{height}")]
    RegionTooSmall { width: u32, height: u32 },
    #[error("region {0:?} lies outside the image")]
    OutsideImage(BoundingBox),
    #[error("metric {0} is not finite")]
    NonFinite(&'static str),
}

/// Per-region image quality measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Variance of the Laplacian response.
    pub sharpness: f32,
    /// Mean intensity (0–255).
    pub brightness: f32,
    /// Standard deviation of intensity.
    pub contrast: f32,
    /// max − min intensity.
    pub dynamic_range: f32,
    pub underexposed_ratio: f32,
    pub overexposed_ratio: f32,
    pub quality_score: f32,
    pub good_quality: bool,
}

impl QualityMetrics {
    /// Returned whenever a region cannot be measured.
    pub fn fallback() -> Self {
        Self {
            sharpness: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            dynamic_range: 0.0,
            underexposed_ratio: 0.0,
            overexposed_ratio: 0.0,
            quality_score: FALLBACK_QUALITY_SCORE,
            good_quality: false,
        }
    }
}

/// Computes [`QualityMetrics`] for whole images or face crops.
#[derive(Debug, Clone)]
pub struct ImageQualityScorer {
    good_quality_threshold: f32,
}

impl Default for ImageQualityScorer {
    fn default() -> Self {
        Self::new(DEFAULT_GOOD_QUALITY_THRESHOLD)
    }
}

impl ImageQualityScorer {
    pub fn new(good_quality_threshold: f32) -> Self {
        Self {
            good_quality_threshold,
        }
    }

    /// Score a greyscale region, falling back on any failure.
    pub fn score(&self, gray: &GrayImage) -> QualityMetrics {
        match self.try_score(gray) {
            Ok(metrics) => metrics,
            Err(err) => {
                tracing::warn!(error = %err, "quality scoring failed; using fallback");
                QualityMetrics::fallback()
            }
        }
    }

    /// Crop `bbox` (clamped to the image) and score it.
    pub fn score_region(&self, image: &DynamicImage, bbox: &BoundingBox) -> QualityMetrics {
        match crop_region(image, bbox) {
            Ok(gray) => self.score(&gray),
            Err(err) => {
                tracing::warn!(error = %err, "face region unusable for quality scoring; using fallback");
                QualityMetrics::fallback()
            }
        }
    }

    /// Score a greyscale region, reporting why it could not be measured.
    pub fn try_score(&self, gray: &GrayImage) -> Result<QualityMetrics, QualityError> {
        let (width, height) = gray.dimensions();
        if width < 3 || height < 3 {
            return Err(QualityError::RegionTooSmall { width, height });
        }

        let pixels = gray.as_raw();
        let n = pixels.len() as f64;

        let sharpness = laplacian_variance(gray);
        let brightness = pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / n;
        let contrast = (pixels
            .iter()
            .map(|&p| (f64::from(p) - brightness).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();

        let (min, max) = pixels
            .iter()
            .fold((u8::MAX, u8::MIN), |(lo, hi), &p| (lo.min(p), hi.max(p)));
        let dynamic_range = f64::from(max - min);

        let underexposed = pixels.iter().filter(|&&p| p < UNDEREXPOSED_BELOW).count() as f64 / n;
        let overexposed = pixels.iter().filter(|&&p| p >= OVEREXPOSED_FROM).count() as f64 / n;

        if !sharpness.is_finite() {
            return Err(QualityError::NonFinite("sharpness"));
        }

        let composite = SHARPNESS_WEIGHT * (sharpness / SHARPNESS_SCALE).min(1.0)
            + BRIGHTNESS_WEIGHT * brightness_score(brightness)
            + CONTRAST_WEIGHT * (contrast / CONTRAST_SCALE).min(1.0)
            + DYNAMIC_RANGE_WEIGHT * (dynamic_range / DYNAMIC_RANGE_SCALE).min(1.0)
            - EXPOSURE_PENALTY * (underexposed + overexposed);
        let quality_score = composite.clamp(0.0, 1.0) as f32;

        Ok(QualityMetrics {
            sharpness: sharpness as f32,
            brightness: brightness as f32,
            contrast: contrast as f32,
            dynamic_range: dynamic_range as f32,
            underexposed_ratio: underexposed as f32,
            overexposed_ratio: overexposed as f32,
            quality_score,
            good_quality: quality_score >= self.good_quality_threshold,
        })
    }
}

/// Triangular score: 1.0 at the peak, falling linearly to 0 at 0 and 2×peak.
fn brightness_score(brightness: f64) -> f64 {
    (1.0 - (brightness - BRIGHTNESS_PEAK).abs() / BRIGHTNESS_PEAK).clamp(0.0, 1.0)
}

/// Variance of the 4-neighbour Laplacian over interior pixels.
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    let px = |x: u32, y: u32| f64::from(gray.get_pixel(x, y).0[0]);

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0.0f64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let response =
                px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += response;
            sum_sq += response * response;
            count += 1.0;
        }
    }

    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

fn crop_region(image: &DynamicImage, bbox: &BoundingBox) -> Result<GrayImage, QualityError> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let x0 = bbox.x1.max(0.0).floor();
    let y0 = bbox.y1.max(0.0).floor();
    let x1 = bbox.x2.min(w).ceil();
    let y1 = bbox.y2.min(h).ceil();

    if !(x1 > x0 && y1 > y0) {
        return Err(QualityError::OutsideImage(*bbox));
    }

    Ok(image
        .crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32)
        .to_luma8())
}
