//! pHash: 32x32 downscale, 2-D DCT-II, top-left 8x8 minus the DC term,
//! bit = 1 iff the coefficient exceeds the median of the other 63
//! coefficients.

use image::{imageops::FilterType, GrayImage};
use std::f64::consts::PI;

const PHASH_SIZE: usize = 32;
const DCT_KEEP: usize = 8;

/// `gray` must already be the BT.601-luma, orientation-applied raster.
pub fn phash(gray: &GrayImage) -> u64 {
    let small = image::imageops::resize(
        gray,
        PHASH_SIZE as u32,
        PHASH_SIZE as u32,
        FilterType::Lanczos3,
    );

    let mut samples = [[0.0f64; PHASH_SIZE]; PHASH_SIZE];
    for y in 0..PHASH_SIZE {
        for x in 0..PHASH_SIZE {
            samples[y][x] = small.get_pixel(x as u32, y as u32).0[0] as f64;
        }
    }

    let dct = dct2d(&samples);

    // top-left 8x8, excluding the DC term at (0, 0)
    let mut coeffs = Vec::with_capacity(DCT_KEEP * DCT_KEEP - 1);
    for y in 0..DCT_KEEP {
        for x in 0..DCT_KEEP {
            if x == 0 && y == 0 {
                continue;
            }
            coeffs.push(dct[y][x]);
        }
    }
    debug_assert_eq!(DCT_KEEP * DCT_KEEP - 1, coeffs.len());

    let median = median_of(&coeffs);

    let mut bits: u64 = 0;
    for (i, &c) in coeffs.iter().enumerate() {
        if c > median {
            bits |= 1 << i;
        }
    }
    bits
}

fn median_of(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("DCT coefficients are never NaN"));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Separable 2-D DCT-II: one 1-D DCT over rows, then over columns.
fn dct2d(input: &[[f64; PHASH_SIZE]; PHASH_SIZE]) -> [[f64; PHASH_SIZE]; PHASH_SIZE] {
    let coeffs = dct1d_matrix();

    // rows: tmp = coeffs * input
    let mut tmp = [[0.0f64; PHASH_SIZE]; PHASH_SIZE];
    for u in 0..PHASH_SIZE {
        for x in 0..PHASH_SIZE {
            let mut sum = 0.0;
            for n in 0..PHASH_SIZE {
                sum += coeffs[u][n] * input[n][x];
            }
            tmp[u][x] = sum;
        }
    }

    // columns: out = tmp * coeffs^T
    let mut out = [[0.0f64; PHASH_SIZE]; PHASH_SIZE];
    for u in 0..PHASH_SIZE {
        for v in 0..PHASH_SIZE {
            let mut sum = 0.0;
            for x in 0..PHASH_SIZE {
                sum += tmp[u][x] * coeffs[v][x];
            }
            out[u][v] = sum;
        }
    }

    out
}

/// Precomputed `N x N` DCT-II basis matrix, `coeffs[u][n] = alpha(u) *
/// cos((2n+1) * u * pi / (2N))`.
fn dct1d_matrix() -> [[f64; PHASH_SIZE]; PHASH_SIZE] {
    let n = PHASH_SIZE as f64;
    let mut m = [[0.0f64; PHASH_SIZE]; PHASH_SIZE];
    for u in 0..PHASH_SIZE {
        let alpha = if u == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        for x in 0..PHASH_SIZE {
            m[u][x] = alpha * ((PI / n) * (x as f64 + 0.5) * u as f64).cos();
        }
    }
    m
}

#[cfg(test)]
mod test {
    use super::*;
    use image::Luma;

    fn filled(value: u8) -> GrayImage {
        GrayImage::from_pixel(100, 100, Luma([value]))
    }

    #[test]
    fn uniform_images_hash_identically() {
        let a = filled(10);
        let b = filled(10);
        assert_eq!(phash(&a), phash(&b));
    }

    #[test]
    fn distinct_patterns_hash_differently() {
        let mut checker = GrayImage::new(64, 64);
        for y in 0..64 {
            for x in 0..64 {
                let v = if (x / 8 + y / 8) % 2 == 0 { 255 } else { 0 };
                checker.put_pixel(x, y, Luma([v]));
            }
        }
        let blank = filled(128);
        assert_ne!(phash(&checker), phash(&blank));
    }

    #[test]
    fn deterministic() {
        let mut img = GrayImage::new(50, 50);
        for y in 0..50 {
            for x in 0..50 {
                img.put_pixel(x, y, Luma([((x * 3 + y * 7) % 255) as u8]));
            }
        }
        assert_eq!(phash(&img), phash(&img));
    }
}
