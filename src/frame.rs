//! Captured frames.
//!
//! - `Frame`: one captured raster image. Interleaved 8-bit samples, RGB order.
//!   Owned by the pipeline iteration that captured it; there is no `Clone`.
//!
//! Sources normalize device formats to RGB before building a `Frame`, so the
//! rest of the pipeline never has to reason about BGR/YUV layouts.

use image::RgbImage;
use std::time::Instant;

use crate::PipelineError;

/// Channel counts the pipeline understands: RGB, and RGBA with alpha ignored.
pub const SUPPORTED_CHANNELS: [u8; 2] = [3, 4];

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured frame.
///
/// The geometry is not validated at construction; consumers that need a
/// well-formed raster call [`Frame::validate`] and surface `InvalidFrame`.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    sequence: u64,
    captured_at: Instant,
}

// Explicitly NOT implementing Clone: a frame moves through the pipeline once.

impl Frame {
    /// Build a frame from raw interleaved samples. Stamped with the current instant.
    pub fn from_raw(data: Vec<u8>, width: u32, height: u32, channels: u8, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            channels,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn from_rgb(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::from_raw(image.into_raw(), width, height, 3, sequence)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Per-session capture counter, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Monotonic capture instant.
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Check area, channel count and buffer length.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidFrame(format!(
                "frame has zero area ({}x{})",
                self.width, self.height
            )));
        }
        if !SUPPORTED_CHANNELS.contains(&self.channels) {
            return Err(PipelineError::InvalidFrame(format!(
                "unsupported channel count {}",
                self.channels
            )));
        }
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(self.channels as usize))
            .ok_or_else(|| PipelineError::InvalidFrame("frame dimensions overflow".into()))?;
        if self.data.len() != expected {
            return Err(PipelineError::InvalidFrame(format!(
                "expected {} bytes for {}x{}x{}, got {}",
                expected,
                self.width,
                self.height,
                self.channels,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Copy the frame into an RGB raster, dropping alpha when present.
    pub fn to_rgb_image(&self) -> Result<RgbImage, PipelineError> {
        self.validate()?;
        let rgb = match self.channels {
            3 => self.data.clone(),
            _ => self
                .data
                .chunks_exact(self.channels as usize)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        };
        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| PipelineError::InvalidFrame("raster size mismatch".into()))
    }

    /// Replace the pixels with an RGB raster, keeping sequence and capture instant.
    pub(crate) fn with_rgb(self, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            channels: 3,
            sequence: self.sequence,
            captured_at: self.captured_at,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
