//! Frame ingestion sources.
//!
//! This module provides different sources for raw frames:
//! - Synthetic scenes (`stub://`, always available)
//! - Directories of still images
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - HTTP MJPEG/JPEG cameras (feature: ingest-mjpeg)
//! - Local video files (feature: ingest-file-ffmpeg)
//!
//! All sources produce RGB `Frame` instances. The ingestion layer is
//! responsible for:
//! - Normalizing device pixel formats to RGB at capture time
//! - Stamping frames with a per-session sequence number
//! - Rate limiting / frame decimation
//!
//! Exclusive access to a device is enforced by `DeviceLease`, which the
//! session takes before calling `open`.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod lease;
#[cfg(feature = "ingest-mjpeg")]
pub mod mjpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use file::{FileConfig, FileSource};
pub use lease::DeviceLease;
#[cfg(feature = "ingest-mjpeg")]
pub use mjpeg::{MjpegConfig, MjpegSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::SourceSettings;
use crate::frame::Frame;
use crate::PipelineError;

/// A camera or video device.
///
/// Lifecycle: `open` once, `read` until `EndOfStream` or an error, `close`
/// once. The session guarantees `close` runs exactly once on every exit path.
pub trait FrameSource: Send {
    /// Stable identity of the underlying device, used for leasing.
    fn device_id(&self) -> &str;

    /// Acquire the OS handle. Fails with `DeviceUnavailable`.
    fn open(&mut self) -> Result<(), PipelineError>;

    /// Capture the next frame. `EndOfStream` when the source is exhausted.
    fn read(&mut self) -> Result<Frame, PipelineError>;

    /// Release the OS handle.
    fn close(&mut self);

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Build the source named by `settings.uri`. Does not open it.
///
/// - `stub://name[?frames=N&fall_every=N&fall_frames=N]` → synthetic scene
/// - `http(s)://...` → MJPEG camera
/// - an existing directory → image stills in name order
/// - `/dev/video*` → V4L2 device
/// - any other path → video file
pub fn source_from_settings(settings: &SourceSettings) -> Result<Box<dyn FrameSource>, PipelineError> {
    let uri = settings.uri.trim();
    if uri.is_empty() {
        return Err(PipelineError::device_unavailable(uri, "empty source uri"));
    }
    if uri.starts_with("stub://") {
        let config = SyntheticConfig::from_uri(uri, settings)?;
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return mjpeg_source(settings);
    }
    if uri.contains("://") {
        return Err(PipelineError::device_unavailable(
            uri,
            "unsupported source scheme",
        ));
    }
    if Path::new(uri).is_dir() {
        return Ok(Box::new(FileSource::new(FileConfig {
            path: uri.into(),
            target_fps: settings.target_fps,
            looped: settings.loop_files,
        })));
    }
    if uri.starts_with("/dev/video") {
        return v4l2_source(settings);
    }
    video_file_source(settings)
}

#[cfg(feature = "ingest-mjpeg")]
fn mjpeg_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>, PipelineError> {
    Ok(Box::new(MjpegSource::new(MjpegConfig {
        url: settings.uri.trim().to_string(),
        target_fps: settings.target_fps,
    })?))
}

#[cfg(not(feature = "ingest-mjpeg"))]
fn mjpeg_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>, PipelineError> {
    Err(PipelineError::device_unavailable(
        settings.uri.trim(),
        "http sources require the ingest-mjpeg feature",
    ))
}

#[cfg(feature = "ingest-v4l2")]
fn v4l2_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>, PipelineError> {
    Ok(Box::new(V4l2Source::new(V4l2Config {
        device: settings.uri.trim().to_string(),
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    })))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn v4l2_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>, PipelineError> {
    Err(PipelineError::device_unavailable(
        settings.uri.trim(),
        "camera devices require the ingest-v4l2 feature",
    ))
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn video_file_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>, PipelineError> {
    Ok(Box::new(file_ffmpeg::FfmpegFileSource::new(FileConfig {
        path: settings.uri.trim().into(),
        target_fps: settings.target_fps,
        looped: false,
    })))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn video_file_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>, PipelineError> {
    Err(PipelineError::device_unavailable(
        settings.uri.trim(),
        "video files require the ingest-file-ffmpeg feature",
    ))
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

#[cfg_attr(
    not(any(
        feature = "ingest-v4l2",
        feature = "ingest-mjpeg",
        feature = "ingest-file-ffmpeg"
    )),
    allow(dead_code)
)]
pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

/// Sleeps so that consecutive captures are at least one frame interval apart.
#[derive(Debug)]
pub(crate) struct FramePacer {
    interval: Duration,
    last: Option<Instant>,
}

impl FramePacer {
    pub(crate) fn new(target_fps: u32) -> Self {
        Self {
            interval: frame_interval(target_fps),
            last: None,
        }
    }

    pub(crate) fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }

    pub(crate) fn reset(&mut self) {
        self.last = None;
    }
}
