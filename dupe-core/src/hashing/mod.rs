//! Hashing primitives: dHash and pHash over a normalized raster, plus exact
//! Hamming distance. Grounded on the teacher's `src/imghash/hamming.rs` (a
//! newtype over `u64` with a `distance_to` method), generalized to two
//! concrete algorithms with their own from-scratch bit layout rather than
//! wrapping a generic perceptual-hash crate's single block hash.

pub mod dhash;
pub mod phash;

use image::{GenericImageView, GrayImage, Luma};

/// Images smaller than this in either dimension produce no hash.
pub const MIN_HASHABLE_DIMENSION: u32 = 32;

pub fn is_hashable(width: u32, height: u32) -> bool {
    width >= MIN_HASHABLE_DIMENSION && height >= MIN_HASHABLE_DIMENSION
}

/// ITU-R BT.601 luma weights, alpha premultiplied against a white background
/// before the weighted sum.
pub fn to_luma_bt601(img: &image::DynamicImage) -> GrayImage {
    let rgba = img.to_rgba8();
    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        let [r, g, b, a] = p.0;
        let alpha = a as f64 / 255.0;
        let blend = |channel: u8| -> f64 { channel as f64 * alpha + 255.0 * (1.0 - alpha) };
        let (r, g, b) = (blend(r), blend(g), blend(b));
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// Exact Hamming distance between two 64-bit hashes, O(1).
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
