//! Still-image directory frame source.
//!
//! Replays the JPEG/PNG/BMP files of a local directory in file-name order.
//! Used for offline evaluation and for feeding recorded datasets through
//! the same pipeline as a live camera.
//!
//! The file source MUST NOT:
//! - Fetch remote URLs
//! - Write anything into the directory

use std::path::{Path, PathBuf};

use crate::frame::Frame;
use crate::ingest::{FramePacer, FrameSource, SourceStats};
use crate::PipelineError;

const STILL_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local path: a directory of stills, or a video file for the ffmpeg source.
    pub path: PathBuf,
    /// Target frame rate. 0 replays as fast as frames decode.
    pub target_fps: u32,
    /// Start over after the last file instead of ending the stream.
    pub looped: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            target_fps: 10,
            looped: false,
        }
    }
}

pub struct FileSource {
    config: FileConfig,
    device: String,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    skipped: u64,
    pacer: FramePacer,
}

impl FileSource {
    pub fn new(config: FileConfig) -> Self {
        let device = config.path.to_string_lossy().to_string();
        let pacer = FramePacer::new(config.target_fps);
        Self {
            config,
            device,
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
            skipped: 0,
            pacer,
        }
    }

    /// Files that failed to decode so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn list_stills(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_still(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn is_still(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| STILL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for FileSource {
    fn device_id(&self) -> &str {
        &self.device
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        let files = Self::list_stills(&self.config.path)
            .map_err(|err| PipelineError::device_unavailable(&self.device, err.to_string()))?;
        if files.is_empty() {
            return Err(PipelineError::device_unavailable(
                &self.device,
                "directory contains no jpg/png/bmp files",
            ));
        }
        log::info!(
            "FileSource: opened {} ({} stills{})",
            self.device,
            files.len(),
            if self.config.looped { ", looped" } else { "" }
        );
        self.files = files;
        self.cursor = 0;
        self.frame_count = 0;
        self.pacer.reset();
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, PipelineError> {
        if self.files.is_empty() {
            return Err(PipelineError::capture_failed(&self.device, "source not open"));
        }
        // At most one full pass per call, so a directory of undecodable
        // files ends instead of spinning.
        let mut attempts = 0;
        while attempts < self.files.len() {
            if self.cursor >= self.files.len() {
                if !self.config.looped {
                    return Err(PipelineError::EndOfStream);
                }
                self.cursor = 0;
            }
            let path = self.files[self.cursor].clone();
            self.cursor += 1;
            attempts += 1;

            match image::open(&path) {
                Ok(image) => {
                    self.pacer.wait();
                    self.frame_count += 1;
                    return Ok(Frame::from_rgb(image.into_rgb8(), self.frame_count));
                }
                Err(err) => {
                    self.skipped += 1;
                    log::warn!("FileSource: skipping {}: {}", path.display(), err);
                }
            }
        }
        if self.cursor >= self.files.len() && !self.config.looped {
            return Err(PipelineError::EndOfStream);
        }
        Err(PipelineError::capture_failed(
            &self.device,
            "no decodable stills in directory",
        ))
    }

    fn close(&mut self) {
        if !self.files.is_empty() {
            log::info!("FileSource: closed {}", self.device);
        }
        self.files.clear();
        self.cursor = 0;
    }

    fn is_healthy(&self) -> bool {
        !self.files.is_empty()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
