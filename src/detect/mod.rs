/*!
 * Change Detection Module
 *
 * Decides whether two sequential captures differ enough to justify the
 * costly downstream processing. Holds no capture history: callers keep the
 * previous sample per agent and pass both samples into each comparison.
 */

pub mod detector;
pub mod image_hash;
pub mod pixel_diff;
pub mod text_diff;

pub use detector::ChangeDetector;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::ThresholdError;
use crate::stream::VideoFrame;

/// Comparison strategy for the image path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectorMode {
    /// Perceptual hash only. Cheap and robust to sensor noise, compression,
    /// and lighting drift; suited to continuously varying feeds (camera).
    DhashOnly,
    /// Sampled pixel difference only. Exact but sensitive to any rendering
    /// noise; suited to deterministic UI content (application screens).
    PixelDifferenceOnly,
    /// Hash first, escalating to the pixel comparison only when the hash is
    /// too close to identical to rule out a subtle change.
    Hybrid,
}

impl Default for DetectorMode {
    fn default() -> Self {
        DetectorMode::Hybrid
    }
}

/// Similarity thresholds, each a fraction in [0, 1].
///
/// A comparison reports "changed" when its score falls below the matching
/// threshold. `suspicious_similarity` is the near-identical floor above which
/// hybrid mode escalates to the pixel comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityThresholds {
    pub text_similarity: f64,
    pub dhash_image_similarity: f64,
    pub pixel_image_similarity: f64,
    pub suspicious_similarity: f64,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            text_similarity: 0.85,
            dhash_image_similarity: 0.85,
            pixel_image_similarity: 0.90,
            suspicious_similarity: 0.998,
        }
    }
}

impl SimilarityThresholds {
    /// Ensures every threshold is a fraction in [0, 1].
    pub fn validate(&self) -> Result<(), ThresholdError> {
        for value in [
            self.text_similarity,
            self.dhash_image_similarity,
            self.pixel_image_similarity,
            self.suspicious_similarity,
        ] {
            validate_fraction(value)?;
        }
        Ok(())
    }
}

pub(crate) fn validate_fraction(value: f64) -> Result<(), ThresholdError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ThresholdError::OutOfRange { value });
    }
    Ok(())
}

/// One capture cycle's worth of extracted content for a single agent.
///
/// Owned transiently by the caller; the detector never retains it.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    /// Extracted text (OCR, transcript, clipboard), if any.
    pub text: Option<String>,
    /// Captured image, if any.
    pub image: Option<RgbaImage>,
}

impl Capture {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            text: None,
            image: Some(image),
        }
    }

    /// Build from a raw video frame; frames with inconsistent byte counts
    /// yield an empty capture.
    pub fn from_video_frame(frame: &VideoFrame) -> Self {
        Self {
            text: None,
            image: frame.to_image(),
        }
    }

    /// Text payload when present and not blank.
    pub fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.trim().is_empty())
    }

    /// True when the capture carries neither text nor a non-degenerate image.
    pub fn is_empty(&self) -> bool {
        let has_image = self
            .image
            .as_ref()
            .is_some_and(|image| image.width() > 0 && image.height() > 0);
        self.non_empty_text().is_none() && !has_image
    }
}

/// Content digest of the raw pixel data, for the exact-duplicate fast path.
pub(crate) fn content_digest(image: &RgbaImage) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&image.width().to_le_bytes());
    hasher.update(&image.height().to_le_bytes());
    hasher.update(image.as_raw());
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_serialize_with_camel_case_keys() {
        let json = serde_json::to_string(&SimilarityThresholds::default()).unwrap();
        assert!(json.contains("\"textSimilarity\""));
        assert!(json.contains("\"dhashImageSimilarity\""));
        assert!(json.contains("\"pixelImageSimilarity\""));
        assert!(json.contains("\"suspiciousSimilarity\""));

        let back: SimilarityThresholds = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SimilarityThresholds::default());
    }

    #[test]
    fn threshold_validation_rejects_out_of_range() {
        let mut thresholds = SimilarityThresholds::default();
        assert!(thresholds.validate().is_ok());

        thresholds.pixel_image_similarity = 1.2;
        assert_eq!(
            thresholds.validate(),
            Err(crate::error::ThresholdError::OutOfRange { value: 1.2 })
        );

        thresholds.pixel_image_similarity = f64::NAN;
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn blank_text_does_not_count_as_content() {
        let capture = Capture::from_text("   \n ");
        assert!(capture.non_empty_text().is_none());
        assert!(capture.is_empty());
    }

    #[test]
    fn degenerate_image_counts_as_empty() {
        let capture = Capture {
            text: None,
            image: Some(RgbaImage::new(0, 0)),
        };
        assert!(capture.is_empty());

        let capture = Capture::from_image(RgbaImage::new(2, 2));
        assert!(!capture.is_empty());
    }

    #[test]
    fn content_digest_distinguishes_dimension_swaps() {
        // Same bytes, different geometry, must not collide.
        let wide = RgbaImage::new(4, 1);
        let tall = RgbaImage::new(1, 4);
        assert_ne!(content_digest(&wide), content_digest(&tall));
        assert_eq!(content_digest(&wide), content_digest(&wide.clone()));
    }
}
