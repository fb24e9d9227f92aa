//! Image fingerprinter: decode (external) -> normalize -> hash set.
//! Grounded on the teacher's `src/imghash.rs` (a thin wrapper that always
//! produces one hash value from a normalized raster), generalized to emit
//! dHash and, when configured, pHash from the same normalized image.

use image::DynamicImage;

use crate::config::DetectionConfig;
use crate::error::FingerprintError;
use crate::hashing::{self, dhash, phash};
use crate::model::{HashAlgo, ImageHash};

pub struct ImageFingerprinter<'a> {
    config: &'a DetectionConfig,
}

impl<'a> ImageFingerprinter<'a> {
    pub fn new(config: &'a DetectionConfig) -> Self {
        Self { config }
    }

    /// Hashes an already-decoded raster. Orientation must already be applied
    /// by the decoder, before hashing.
    pub fn hash(&self, raster: &DynamicImage) -> Result<Vec<ImageHash>, FingerprintError> {
        let (width, height) = (raster.width(), raster.height());
        if !hashing::is_hashable(width, height) {
            return Err(FingerprintError::BelowMinimumSize { width, height });
        }

        let luma = hashing::to_luma_bt601(raster);

        let mut hashes = Vec::with_capacity(self.config.hash_algorithms.len());
        for algo in &self.config.hash_algorithms {
            let value = match algo {
                HashAlgo::DHash => dhash::dhash(&luma),
                HashAlgo::PHash => phash::phash(&luma),
            };
            hashes.push(ImageHash::new(*algo, value, width, height));
        }
        Ok(hashes)
    }

    /// Convenience entry point for callers that only have raw bytes; decodes
    /// with the caller-supplied `Decoder` and then hashes the result.
    pub fn hash_bytes(
        &self,
        bytes: &[u8],
        decoder: &dyn crate::traits::Decoder,
        max_dim: u32,
    ) -> Result<Vec<ImageHash>, FingerprintError> {
        let raster = decoder
            .decode(bytes, max_dim)
            .map_err(|e| FingerprintError::DecodeFailed(e.to_string()))?;
        self.hash(&raster)
    }
}
