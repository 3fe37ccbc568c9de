//! Local video file frame source using FFmpeg.
//!
//! Decodes the best video track of a local file and converts every frame to
//! RGB24 in-memory. The end of the file is `EndOfStream`, which finishes the
//! session normally.

use ffmpeg_next as ffmpeg;
use std::time::Instant;

use super::file::FileConfig;
use crate::frame::Frame;
use crate::ingest::{health_grace, FramePacer, FrameSource, SourceStats};
use crate::PipelineError;

struct Decoding {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    flushed: bool,
}

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    device: String,
    decoding: Option<Decoding>,
    pacer: FramePacer,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: FileConfig) -> Self {
        let device = config.path.to_string_lossy().to_string();
        let pacer = FramePacer::new(config.target_fps);
        Self {
            config,
            device,
            decoding: None,
            pacer,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn unavailable(&self, what: &str, err: impl std::fmt::Display) -> PipelineError {
        PipelineError::device_unavailable(&self.device, format!("{}: {}", what, err))
    }

    fn start_decoding(&self) -> Result<Decoding, PipelineError> {
        ffmpeg::init().map_err(|err| self.unavailable("initialize ffmpeg", err))?;
        let input = ffmpeg::format::input(&self.config.path)
            .map_err(|err| self.unavailable("open file input", err))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| self.unavailable("probe", "file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|err| self.unavailable("load decoder parameters", err))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|err| self.unavailable("open video decoder", err))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|err| self.unavailable("create scaler", err))?;

        Ok(Decoding {
            input,
            stream_index,
            decoder,
            scaler,
            flushed: false,
        })
    }
}

impl Decoding {
    /// Next decoded RGB frame, `None` once the file is drained.
    fn next_rgb(&mut self) -> Result<Option<(Vec<u8>, u32, u32)>, String> {
        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .map_err(|err| format!("scale frame to RGB: {}", err))?;
                return frame_to_pixels(&rgb_frame).map(Some);
            }
            if self.flushed {
                return Ok(None);
            }
            let stream_index = self.stream_index;
            match self.input.packets().find(|(s, _)| s.index() == stream_index) {
                Some((_, packet)) => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(|err| format!("send packet to decoder: {}", err))?,
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(|err| format!("flush decoder: {}", err))?;
                    self.flushed = true;
                }
            }
        }
    }
}

impl FrameSource for FfmpegFileSource {
    fn device_id(&self) -> &str {
        &self.device
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        let decoding = self.start_decoding()?;
        log::info!(
            "FfmpegFileSource: opened {} ({}x{})",
            self.device,
            decoding.decoder.width(),
            decoding.decoder.height()
        );
        self.decoding = Some(decoding);
        self.frame_count = 0;
        self.last_error = None;
        self.pacer.reset();
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, PipelineError> {
        let decoding = self
            .decoding
            .as_mut()
            .ok_or_else(|| PipelineError::capture_failed(&self.device, "source not open"))?;
        let next = decoding.next_rgb();
        let (pixels, width, height) = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(PipelineError::EndOfStream),
            Err(reason) => {
                self.last_error = Some(reason.clone());
                return Err(PipelineError::capture_failed(&self.device, reason));
            }
        };
        self.pacer.wait();
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Frame::from_raw(pixels, width, height, 3, self.frame_count))
    }

    fn close(&mut self) {
        if self.decoding.take().is_some() {
            log::info!("FfmpegFileSource: closed {}", self.device);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.decoding.is_none() {
            return false;
        }
        match self.last_frame_at {
            Some(at) => at.elapsed() <= health_grace(self.config.target_fps),
            None => true,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.device.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32), String> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let frame = data
            .get(..row_bytes * height as usize)
            .ok_or_else(|| "ffmpeg frame is shorter than its geometry".to_string())?;
        return Ok((frame.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .ok_or_else(|| "ffmpeg frame row is out of bounds".to_string())?,
        );
    }

    Ok((pixels, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_unavailable() {
        let mut source = FfmpegFileSource::new(FileConfig {
            path: "/nonexistent/fall-sentinel.mp4".into(),
            target_fps: 0,
            looped: false,
        });
        assert!(matches!(
            source.open(),
            Err(PipelineError::DeviceUnavailable { .. })
        ));
        assert!(!source.is_healthy());
    }
}
