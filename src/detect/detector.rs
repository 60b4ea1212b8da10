/*!
 * Change Detector
 *
 * Scores the similarity between two sequential captures and reports whether
 * the difference is significant. Stateless apart from the runtime-mutable
 * thresholds; every comparison reads the threshold values once at call time,
 * so a concurrent update never alters an in-flight decision.
 */

use image::RgbaImage;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::ThresholdError;

use super::{image_hash, pixel_diff, text_diff};
use super::{validate_fraction, Capture, DetectorMode, SimilarityThresholds};

/// Similarity engine gating expensive downstream processing.
pub struct ChangeDetector {
    thresholds: RwLock<SimilarityThresholds>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self {
            thresholds: RwLock::new(SimilarityThresholds::default()),
        }
    }

    /// Start from explicit thresholds; every value must be in [0, 1].
    pub fn with_thresholds(thresholds: SimilarityThresholds) -> Result<Self, ThresholdError> {
        thresholds.validate()?;
        Ok(Self {
            thresholds: RwLock::new(thresholds),
        })
    }

    /// Current threshold configuration.
    pub fn thresholds(&self) -> SimilarityThresholds {
        *self.thresholds.read()
    }

    pub fn set_text_threshold(&self, value: f64) -> Result<(), ThresholdError> {
        validate_fraction(value)?;
        self.thresholds.write().text_similarity = value;
        Ok(())
    }

    pub fn set_dhash_threshold(&self, value: f64) -> Result<(), ThresholdError> {
        validate_fraction(value)?;
        self.thresholds.write().dhash_image_similarity = value;
        Ok(())
    }

    pub fn set_pixel_threshold(&self, value: f64) -> Result<(), ThresholdError> {
        validate_fraction(value)?;
        self.thresholds.write().pixel_image_similarity = value;
        Ok(())
    }

    pub fn set_suspicious_threshold(&self, value: f64) -> Result<(), ThresholdError> {
        validate_fraction(value)?;
        self.thresholds.write().suspicious_similarity = value;
        Ok(())
    }

    /// Whether `current` differs significantly from `previous`.
    ///
    /// The text and image paths are independent; a significant difference on
    /// either reports "changed". A capture that is missing, empty, or lost a
    /// modality the other side has reports "changed": a first or novel
    /// capture is never silently suppressed.
    pub fn is_significant_change(
        &self,
        previous: &Capture,
        current: &Capture,
        mode: DetectorMode,
    ) -> bool {
        if previous.is_empty() || current.is_empty() {
            return true;
        }
        let thresholds = *self.thresholds.read();

        match (previous.non_empty_text(), current.non_empty_text()) {
            (Some(prev), Some(cur)) => {
                let score = text_diff::similarity(prev, cur);
                debug!(score, threshold = thresholds.text_similarity, "text compared");
                if score < thresholds.text_similarity {
                    return true;
                }
            }
            (None, None) => {}
            _ => return true,
        }

        match (&previous.image, &current.image) {
            (Some(prev), Some(cur)) => {
                if Self::image_changed(prev, cur, mode, &thresholds) {
                    return true;
                }
            }
            (None, None) => {}
            _ => return true,
        }

        false
    }

    fn image_changed(
        previous: &RgbaImage,
        current: &RgbaImage,
        mode: DetectorMode,
        thresholds: &SimilarityThresholds,
    ) -> bool {
        match mode {
            DetectorMode::DhashOnly => {
                let score = image_hash::similarity(previous, current);
                debug!(score, threshold = thresholds.dhash_image_similarity, "dhash compared");
                score < thresholds.dhash_image_similarity
            }
            DetectorMode::PixelDifferenceOnly => {
                let score = pixel_diff::similarity(previous, current);
                debug!(score, threshold = thresholds.pixel_image_similarity, "pixels compared");
                score < thresholds.pixel_image_similarity
            }
            DetectorMode::Hybrid => hybrid_verdict(
                image_hash::similarity(previous, current),
                || pixel_diff::similarity(previous, current),
                thresholds,
            ),
        }
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Tiered decision for hybrid mode.
///
/// The hash is trusted when it is confidently different (below the hash
/// threshold: changed) or inside its confidence band (not changed). Only the
/// near-identical band at or above `suspicious_similarity` escalates to the
/// pixel comparison, which is paid for lazily.
fn hybrid_verdict(
    dhash_score: f64,
    pixel_score: impl FnOnce() -> f64,
    thresholds: &SimilarityThresholds,
) -> bool {
    if dhash_score < thresholds.dhash_image_similarity {
        return true;
    }
    if dhash_score >= thresholds.suspicious_similarity {
        let score = pixel_score();
        debug!(
            dhash_score,
            pixel_score = score,
            "hash near-identical, escalated to pixel comparison"
        );
        return score < thresholds.pixel_image_similarity;
    }
    false
}
