//! Error taxonomy for the capture-infer-stream loop.
//!
//! Errors fall into two groups:
//! - Session-level errors end the session and release the device
//!   (`DeviceUnavailable`, `EndOfStream`, `CaptureFailed`, `ModelLoadFailure`).
//! - Frame-local errors drop or skip one frame and the loop moves on
//!   (`InvalidFrame`, `InferenceError`, `EncodeError`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The capture device could not be opened or is leased by another session.
    #[error("device {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    /// The source has no more frames. Normal session termination.
    #[error("end of stream")]
    EndOfStream,

    /// The device failed mid-session.
    #[error("capture failed on {device}: {reason}")]
    CaptureFailed { device: String, reason: String },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("inference failed: {0}")]
    InferenceError(String),

    #[error("encode failed: {0}")]
    EncodeError(String),

    /// No usable model. The pipeline refuses to stream.
    #[error("model load failed: {0}")]
    ModelLoadFailure(String),
}

impl PipelineError {
    pub fn device_unavailable(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn capture_failed(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::CaptureFailed {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that only cost one frame.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidFrame(_) | Self::InferenceError(_) | Self::EncodeError(_)
        )
    }
}
