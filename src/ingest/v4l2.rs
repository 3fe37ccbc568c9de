//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing frames from local V4L2
//! devices (USB webcams, CSI cameras exposed through v4l2).
//!
//! The V4L2 source is responsible for:
//! - Negotiating a capture format with the device (RGB3, YUYV, NV12 or MJPG)
//! - Capturing frames in-memory through an mmap buffer stream
//! - Normalizing every format to RGB before building a `Frame`
//!
//! The V4L2 source MUST NOT:
//! - Store captured frames to disk
//! - Retain frames beyond handoff to the pipeline

use ouroboros::self_referencing;
use std::time::Instant;

use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::frame::Frame;
use crate::ingest::{health_grace, FrameSource, SourceStats};
use crate::PipelineError;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Frame rate requested from the driver. 0 keeps the driver default.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CaptureFormat {
    Raw(PixelFormat),
    Mjpeg,
}

impl CaptureFormat {
    fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Raw(PixelFormat::Rgb24)),
            b"BGR3" => Some(Self::Raw(PixelFormat::Bgr24)),
            b"YUYV" => Some(Self::Raw(PixelFormat::Yuyv)),
            b"NV12" => Some(Self::Raw(PixelFormat::Nv12)),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<DeviceState>,
    format: CaptureFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: CaptureFormat::Raw(PixelFormat::Rgb24),
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> PipelineError {
        PipelineError::device_unavailable(&self.config.device, reason.to_string())
    }

    fn decode(&self, buf: &[u8]) -> Result<Frame, PipelineError> {
        let sequence = self.frame_count;
        match self.format {
            CaptureFormat::Raw(format) => {
                let rgb = normalize_to_rgb(buf, self.active_width, self.active_height, format)?;
                Ok(Frame::from_raw(
                    rgb,
                    self.active_width,
                    self.active_height,
                    3,
                    sequence,
                ))
            }
            CaptureFormat::Mjpeg => {
                let image = image::load_from_memory(buf)
                    .map_err(|err| PipelineError::InvalidFrame(format!("MJPG decode: {}", err)))?;
                Ok(Frame::from_rgb(image.into_rgb8(), sequence))
            }
        }
    }
}

impl FrameSource for V4l2Source {
    fn device_id(&self) -> &str {
        &self.config.device
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .map_err(|err| self.unavailable(format!("open failed: {}", err)))?;
        let mut format = device
            .format()
            .map_err(|err| self.unavailable(format!("read format: {}", err)))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .map_err(|err| self.unavailable(format!("read format: {}", err)))?
            }
        };
        // Drivers may substitute a format they prefer.
        self.format = CaptureFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            self.unavailable(format!("unsupported pixel format {}", format.fourcc))
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;
        self.frame_count = 0;

        let device_name = self.config.device.clone();
        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4).map_err(
                    |err| {
                        PipelineError::device_unavailable(
                            &device_name,
                            format!("create buffer stream: {}", err),
                        )
                    },
                )
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: opened {} ({}x{} {})",
            self.config.device,
            self.active_width,
            self.active_height,
            format.fourcc
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, PipelineError> {
        use v4l::io::traits::CaptureStream;

        let device = self.config.device.clone();
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| PipelineError::capture_failed(&device, "device not open"))?;
        let captured = state.with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()));
        let buf = captured.map_err(|err| {
            self.last_error = Some(err.to_string());
            PipelineError::capture_failed(&device, err.to_string())
        })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.decode(&buf)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: closed {}", self.config.device);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
