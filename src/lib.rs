//! Fall Sentinel
//!
//! Watches a camera, classifies every frame as fall / no-fall, debounces the
//! per-frame signal into one alert per fall episode, and serves the annotated
//! frames as a live MJPEG stream.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource → Preprocessor → Classifier → PersistenceFilter
//!                                              │
//!                        AlertSink ◄── trigger ┤
//!                                              ▼
//!                           FrameAnnotator → FrameEncoder → StreamPipeline
//! ```
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (synthetic, still directories, V4L2, MJPEG, video files)
//! - `preprocess`: Frame → normalized model tensor
//! - `detect`: Classifier trait, backends and the class-index mapping
//! - `filter`: Persistence filter (consecutive-frame debounce)
//! - `alert`: Alert sinks (log, in-process hub, MQTT)
//! - `annotate` / `encode`: Overlay and JPEG encoding
//! - `pipeline`: Session state machine and the lazy chunk stream
//! - `server`: HTTP transport (`/video_feed`, `/alerts`, `/health`)
//! - `config`: File + environment configuration

pub mod alert;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod encode;
pub mod error;
pub mod filter;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod preprocess;
pub mod server;

pub use alert::{
    AlertHub, AlertSink, AlertSubscription, FallAlert, JsonLinesSink, LogSink, MultiSink,
};
pub use annotate::FrameAnnotator;
pub use config::{
    FilterSettings, ModelSettings, OverlayMode, SentinelConfig, SessionSettings, SourceSettings,
    StreamSettings,
};
pub use detect::{load_classifier, ClassMapping, Classifier, FallClass, Prediction, StubBackend};
pub use encode::FrameEncoder;
pub use error::PipelineError;
pub use filter::{FilterDecision, FilterState, PersistenceFilter};
pub use frame::Frame;
pub use ingest::{source_from_settings, DeviceLease, FrameSource, SourceStats};
pub use pipeline::{
    CancelHandle, FrameAnalyzer, FrameDelivery, LiveStream, Observation, SessionReport,
    SessionState, SessionStats, StreamChunk, StreamPipeline, StreamSession,
};
pub use preprocess::{Preprocessor, Tensor, MODEL_INPUT_SIZE};
pub use server::{ServerConfig, ServerHandle, SourceFactory, StreamServer};
