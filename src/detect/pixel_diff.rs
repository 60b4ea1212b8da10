/*!
 * Sampled Pixel Difference
 *
 * Direct comparison over a deterministic sampling grid. Far more expensive
 * than hashing and sensitive to any rendering noise, so the detector only
 * runs it when precision is actually wanted.
 */

use image::{Rgba, RgbaImage};

use super::content_digest;

/// Per-channel tolerance below which two sampled pixels still count as equal.
const CHANNEL_TOLERANCE: u8 = 2;

/// Upper bound on sampled pixels per comparison.
const TARGET_SAMPLES: u32 = 10_000;

/// Fraction of sampled pixels that match, in [0, 1].
///
/// Images with different dimensions (or zero area) score 0.0; byte-identical
/// images short-circuit to 1.0 without touching pixels.
pub fn similarity(a: &RgbaImage, b: &RgbaImage) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 0.0;
    }
    let (width, height) = a.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }
    if content_digest(a) == content_digest(b) {
        return 1.0;
    }

    let stride = sample_stride(width, height);
    let mut sampled = 0u32;
    let mut matching = 0u32;
    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            sampled += 1;
            if pixels_match(a.get_pixel(x, y), b.get_pixel(x, y)) {
                matching += 1;
            }
            x += stride;
        }
        y += stride;
    }
    f64::from(matching) / f64::from(sampled)
}

/// Grid stride that keeps the sample count near `TARGET_SAMPLES`.
fn sample_stride(width: u32, height: u32) -> u32 {
    let pixels = u64::from(width) * u64::from(height);
    let stride = (pixels as f64 / f64::from(TARGET_SAMPLES)).sqrt().ceil() as u32;
    stride.max(1)
}

fn pixels_match(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .take(3)
        .all(|(x, y)| x.abs_diff(*y) <= CHANNEL_TOLERANCE)
}
