//! Frame → JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::Frame;
use crate::PipelineError;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Encodes frames as baseline JPEG. Each output is independently decodable.
#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    quality: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder {
    /// Quality is clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn content_type(&self) -> &'static str {
        "image/jpeg"
    }

    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, PipelineError> {
        frame
            .validate()
            .map_err(|err| PipelineError::EncodeError(err.to_string()))?;

        // JPEG has no alpha channel.
        let rgb;
        let pixels = if frame.channels() == 3 {
            frame.pixels()
        } else {
            rgb = frame
                .to_rgb_image()
                .map_err(|err| PipelineError::EncodeError(err.to_string()))?;
            rgb.as_raw().as_slice()
        };

        let mut encoded = Vec::with_capacity(pixels.len() / 8);
        JpegEncoder::new_with_quality(&mut encoded, self.quality)
            .encode(
                pixels,
                frame.width(),
                frame.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(|err| PipelineError::EncodeError(err.to_string()))?;
        Ok(encoded)
    }
}
