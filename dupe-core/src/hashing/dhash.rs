//! dHash: 9x8 area-averaged downscale, bit = 1 iff a pixel is brighter than
//! its right neighbor. The bit ordering is fixed so that two independent
//! implementations given the same normalized raster always agree
//! bit-for-bit.

use image::{imageops::FilterType, GrayImage};

const DHASH_WIDTH: u32 = 9;
const DHASH_HEIGHT: u32 = 8;

/// `gray` must already be the BT.601-luma, orientation-applied raster (see
/// [`super::to_luma_bt601`]); this function only does the final downscale and
/// bit extraction.
pub fn dhash(gray: &GrayImage) -> u64 {
    let small = image::imageops::resize(gray, DHASH_WIDTH, DHASH_HEIGHT, FilterType::Triangle);

    let mut bits: u64 = 0;
    let mut bit_index = 0u32;
    for y in 0..DHASH_HEIGHT {
        for x in 0..(DHASH_WIDTH - 1) {
            let left = small.get_pixel(x, y).0[0];
            let right = small.get_pixel(x + 1, y).0[0];
            if left > right {
                bits |= 1 << bit_index;
            }
            bit_index += 1;
        }
    }
    debug_assert_eq!(64, bit_index);
    bits
}
