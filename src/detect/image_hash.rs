/*!
 * Perceptual Hash
 *
 * 64-bit difference hash: grayscale, shrink to 9x8, one bit per horizontal
 * gradient. Similar images land within a few bits of each other even across
 * compression artifacts and lighting drift.
 */

use image::imageops::{self, FilterType};
use image::RgbaImage;

use super::content_digest;

const HASH_BITS: u32 = 64;

/// Compute the 64-bit difference hash of an image.
pub fn dhash(image: &RgbaImage) -> u64 {
    let gray = imageops::grayscale(image);
    let scaled = imageops::resize(&gray, 9, 8, FilterType::Triangle);

    let mut hash = 0u64;
    for y in 0..8 {
        for x in 0..8 {
            let left = scaled.get_pixel(x, y)[0];
            let right = scaled.get_pixel(x + 1, y)[0];
            hash = (hash << 1) | u64::from(left < right);
        }
    }
    hash
}

/// Perceptual similarity in [0, 1]: 1.0 for identical hashes, decreasing by
/// 1/64 per differing gradient bit. Degenerate (zero-area) images score 0.0.
pub fn similarity(a: &RgbaImage, b: &RgbaImage) -> f64 {
    if a.width() == 0 || a.height() == 0 || b.width() == 0 || b.height() == 0 {
        return 0.0;
    }
    if content_digest(a) == content_digest(b) {
        return 1.0;
    }
    let distance = (dhash(a) ^ dhash(b)).count_ones();
    1.0 - f64::from(distance) / f64::from(HASH_BITS)
}
