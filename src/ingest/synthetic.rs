//! Synthetic frame source (`stub://`).
//!
//! Renders a bright scene with periodic dark "fall episodes". Paired with the
//! luminance stub classifier this drives the whole pipeline without a camera
//! or a model file.

use rand::Rng;

use crate::config::SourceSettings;
use crate::frame::Frame;
use crate::ingest::{FramePacer, FrameSource, SourceStats};
use crate::PipelineError;

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Device identity, normally the `stub://` uri itself.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Capture pacing. 0 disables pacing.
    pub target_fps: u32,
    /// `EndOfStream` after this many frames. `None` runs forever.
    pub frame_limit: Option<u64>,
    /// A fall episode starts every `fall_every` frames. 0 disables episodes.
    pub fall_every: u64,
    /// Length of each fall episode in frames.
    pub fall_frames: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            width: 640,
            height: 480,
            target_fps: 10,
            frame_limit: None,
            fall_every: 100,
            fall_frames: 12,
        }
    }
}

impl SyntheticConfig {
    /// Parse `stub://name?frames=N&fall_every=N&fall_frames=N`.
    pub fn from_uri(uri: &str, settings: &SourceSettings) -> Result<Self, PipelineError> {
        let mut config = Self {
            device: uri.to_string(),
            width: settings.width,
            height: settings.height,
            target_fps: settings.target_fps,
            ..Self::default()
        };
        let query = match uri.split_once('?') {
            Some((_, query)) => query,
            None => return Ok(config),
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let parsed = value.parse::<u64>().map_err(|_| {
                PipelineError::device_unavailable(
                    uri,
                    format!("invalid value for '{}': '{}'", key, value),
                )
            })?;
            match key {
                "frames" => config.frame_limit = Some(parsed),
                "fall_every" => config.fall_every = parsed,
                "fall_frames" => config.fall_frames = parsed,
                other => {
                    return Err(PipelineError::device_unavailable(
                        uri,
                        format!("unknown stub parameter '{}'", other),
                    ))
                }
            }
        }
        Ok(config)
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    opened: bool,
    pacer: FramePacer,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let pacer = FramePacer::new(config.target_fps);
        Self {
            config,
            frame_count: 0,
            opened: false,
            pacer,
        }
    }

    /// True when frame `n` (1-based) falls inside a fall episode.
    pub fn in_fall_episode(&self, n: u64) -> bool {
        if self.config.fall_every == 0 || self.config.fall_frames == 0 {
            return false;
        }
        let phase = n % self.config.fall_every;
        let start = self
            .config
            .fall_every
            .saturating_sub(self.config.fall_frames);
        phase >= start
    }

    /// Bright textured background most of the time; a dark scene during
    /// fall episodes. Each frame carries a little noise so consecutive
    /// frames never repeat exactly.
    fn generate_synthetic_pixels(&self, n: u64) -> Vec<u8> {
        let width = self.config.width as u64;
        let height = self.config.height as u64;
        let (base, spread) = if self.in_fall_episode(n) {
            (10u64, 20u64)
        } else {
            (180, 40)
        };

        let mut rng = rand::thread_rng();
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let level = base + (x + y + n) % spread;
                for _ in 0..3 {
                    let noise: i16 = rng.gen_range(-3..=3);
                    pixels.push((level as i16 + noise).clamp(0, 255) as u8);
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn device_id(&self) -> &str {
        &self.config.device
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(PipelineError::device_unavailable(
                &self.config.device,
                "synthetic geometry has zero area",
            ));
        }
        self.opened = true;
        self.frame_count = 0;
        self.pacer.reset();
        log::info!("SyntheticSource: opened {}", self.config.device);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, PipelineError> {
        if !self.opened {
            return Err(PipelineError::capture_failed(
                &self.config.device,
                "source not open",
            ));
        }
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Err(PipelineError::EndOfStream);
            }
        }
        self.pacer.wait();
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels(self.frame_count);
        Ok(Frame::from_raw(
            pixels,
            self.config.width,
            self.config.height,
            3,
            self.frame_count,
        ))
    }

    fn close(&mut self) {
        if self.opened {
            log::info!("SyntheticSource: closed {}", self.config.device);
        }
        self.opened = false;
    }

    fn is_healthy(&self) -> bool {
        self.opened
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
