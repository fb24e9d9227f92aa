//! Fingerprinting: turns a decoded raster or a video file into the hash
//! values the rest of the engine compares.

mod frame_extractor;
pub mod image;
pub mod video;

pub use self::image::ImageFingerprinter;
pub use frame_extractor::FfmpegDecoder;
pub use video::VideoFingerprinter;
