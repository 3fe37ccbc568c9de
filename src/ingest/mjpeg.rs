//! HTTP MJPEG/JPEG frame source.
//!
//! Network cameras (ESP32-CAM, IP webcams, another sentinel's `/video_feed`)
//! either serve a `multipart/x-mixed-replace` stream of JPEGs or a single
//! JPEG snapshot per request. Both are decoded in-memory to RGB.
//!
//! Frames arriving faster than `target_fps` are decimated (dropped), never
//! queued.

use std::io::Read;
use std::time::{Duration, Instant};

use url::Url;

use crate::frame::Frame;
use crate::ingest::{frame_interval, health_grace, FrameSource, SourceStats};
use crate::PipelineError;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// Configuration for an HTTP camera.
#[derive(Clone, Debug)]
pub struct MjpegConfig {
    /// `http(s)://` stream or snapshot URL.
    pub url: String,
    pub target_fps: u32,
}

impl Default for MjpegConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/stream".to_string(),
            target_fps: 10,
        }
    }
}

pub struct MjpegSource {
    config: MjpegConfig,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Multipart(MjpegStream),
    Snapshot,
}

impl MjpegSource {
    pub fn new(config: MjpegConfig) -> Result<Self, PipelineError> {
        let url = Url::parse(&config.url)
            .map_err(|err| PipelineError::device_unavailable(&config.url, err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::device_unavailable(
                &config.url,
                format!("unsupported scheme '{}'; expected http(s)", url.scheme()),
            ));
        }
        Ok(Self {
            config,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            last_error: None,
        })
    }

    fn capture_failed(&mut self, reason: impl std::fmt::Display) -> PipelineError {
        self.last_error = Some(reason.to_string());
        PipelineError::capture_failed(&self.config.url, reason.to_string())
    }
}

impl FrameSource for MjpegSource {
    fn device_id(&self) -> &str {
        &self.config.url
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        let response = ureq::get(&self.config.url)
            .call()
            .map_err(|err| PipelineError::device_unavailable(&self.config.url, err.to_string()))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        self.stream = if content_type.to_lowercase().contains("multipart") {
            Some(HttpStream::Multipart(MjpegStream::new(response.into_reader())))
        } else {
            Some(HttpStream::Snapshot)
        };
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        self.frame_count = 0;
        log::info!("MjpegSource: connected to {}", self.config.url);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, PipelineError> {
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            let next = match self.stream.as_mut() {
                None => Err("source not open".to_string()),
                Some(HttpStream::Multipart(stream)) => stream.read_next_jpeg(),
                Some(HttpStream::Snapshot) => fetch_single_jpeg(&self.config.url),
            };
            let jpeg_bytes = next.map_err(|reason| self.capture_failed(reason))?;

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            self.frame_count += 1;
            self.last_frame_at = Some(now);
            let image = image::load_from_memory(&jpeg_bytes)
                .map_err(|err| PipelineError::InvalidFrame(format!("decode jpeg: {}", err)))?;
            return Ok(Frame::from_rgb(image.into_rgb8(), self.frame_count));
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            log::info!("MjpegSource: disconnected from {}", self.config.url);
        }
        self.connected_at = None;
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.url.clone(),
        }
    }
}

/// Splits a multipart byte stream into complete JPEGs by SOI/EOI markers.
pub(crate) struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    pub(crate) fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    pub(crate) fn read_next_jpeg(&mut self) -> Result<Vec<u8>, String> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|err| format!("read mjpeg chunk: {}", err))?;
            if read == 0 {
                return Err("mjpeg stream ended".to_string());
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>, String> {
    let response = ureq::get(url)
        .call()
        .map_err(|err| format!("fetch jpeg snapshot: {}", err))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .map_err(|err| format!("read jpeg snapshot: {}", err))?;
    if bytes.is_empty() {
        return Err("empty jpeg snapshot".to_string());
    }
    Ok(bytes)
}

pub(crate) fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFFu8, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFFu8, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
