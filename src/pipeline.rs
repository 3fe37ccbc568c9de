//! Streaming session orchestration.
//!
//! A session pulls frames from one source and turns each into a JPEG chunk:
//!
//! ```text
//! capture → preprocess → infer → filter → (trigger) alert → annotate → encode
//! ```
//!
//! The work is split in two halves:
//! - [`StreamSession::next_observation`] is the lazy producer. It captures,
//!   classifies and updates the persistence filter, with no side effects
//!   outside the session.
//! - [`FrameDelivery::deliver`] is the consumer step. It notifies the alert
//!   sink, draws the overlay and encodes.
//!
//! [`LiveStream`] joins both halves as an `Iterator` of [`StreamChunk`]s. The
//! consumer pulls; nothing is buffered between frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::alert::{AlertSink, FallAlert, DEFAULT_ALERT_MESSAGE};
use crate::annotate::FrameAnnotator;
use crate::config::{OverlayMode, SessionSettings, StreamSettings};
use crate::detect::{Classifier, Prediction};
use crate::encode::FrameEncoder;
use crate::filter::{FilterDecision, PersistenceFilter};
use crate::frame::Frame;
use crate::ingest::{DeviceLease, FrameSource};
use crate::preprocess::Preprocessor;
use crate::PipelineError;

// ----------------------------------------------------------------------------
// Session state
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Streaming,
    /// Source reached its end.
    StoppedNormal,
    /// Maximum stream duration elapsed.
    StoppedTimeout,
    /// Device failed mid-session.
    StoppedError,
    /// Consumer went away or the session was cancelled.
    StoppedDisconnect,
}

impl SessionState {
    pub fn is_stopped(&self) -> bool {
        !matches!(self, Self::Starting | Self::Streaming)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::StoppedNormal => "stopped_normal",
            Self::StoppedTimeout => "stopped_timeout",
            Self::StoppedError => "stopped_error",
            Self::StoppedDisconnect => "stopped_disconnect",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session frame accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames read from the source.
    pub captured: u64,
    /// Chunks handed to the consumer.
    pub yielded: u64,
    /// Frames with a frame-local capture or analysis failure.
    pub skipped: u64,
    /// Frames lost to encode failures.
    pub dropped: u64,
    /// Alerts sent to the sink.
    pub alerts: u64,
}

/// Final outcome of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub device: String,
    pub state: SessionState,
    pub stats: SessionStats,
    /// Reason for `StoppedError`.
    pub error: Option<String>,
}

/// Shared stop flag. Checked once per iteration; a set flag ends the session
/// with `StoppedDisconnect` before the next capture.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Device guard
// ----------------------------------------------------------------------------

/// Open source plus its lease. `release` closes the source and frees the
/// lease once; later calls and the final drop are no-ops.
struct SessionDevice {
    source: Box<dyn FrameSource>,
    lease: Option<DeviceLease>,
}

impl SessionDevice {
    fn release(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.source.close();
            log::info!("device released: {}", lease.device());
        }
    }

    fn is_released(&self) -> bool {
        self.lease.is_none()
    }
}

impl Drop for SessionDevice {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Analysis
// ----------------------------------------------------------------------------

/// Preprocessor and classifier, shared by consecutive sessions.
pub struct FrameAnalyzer {
    preprocessor: Preprocessor,
    classifier: Box<dyn Classifier>,
}

impl FrameAnalyzer {
    pub fn new(classifier: Box<dyn Classifier>) -> Self {
        Self {
            preprocessor: Preprocessor::new(),
            classifier,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.classifier.is_ready()
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    pub fn analyze(&mut self, frame: &Frame) -> Result<Prediction, PipelineError> {
        let tensor = self.preprocessor.process(frame)?;
        self.classifier.infer(&tensor)
    }
}

/// One captured frame with its classification.
///
/// `prediction` and `decision` are `None` when analysis failed; the frame is
/// still delivered, unannotated.
#[derive(Debug)]
pub struct Observation {
    pub frame: Frame,
    pub prediction: Option<Prediction>,
    pub decision: Option<FilterDecision>,
}

impl Observation {
    pub fn triggered(&self) -> bool {
        self.decision.map(|d| d.triggered).unwrap_or(false)
    }
}

// ----------------------------------------------------------------------------
// StreamSession
// ----------------------------------------------------------------------------

/// One streaming session over one device. Owns the persistence state.
pub struct StreamSession {
    device: SessionDevice,
    device_id: String,
    filter: PersistenceFilter,
    state: SessionState,
    started_at: Instant,
    deadline: Option<Instant>,
    cancel: CancelHandle,
    stats: SessionStats,
    last_error: Option<String>,
}

impl StreamSession {
    /// Lease and open the source.
    ///
    /// Fails with `ModelLoadFailure` before touching the device when the
    /// classifier is not ready, and with `DeviceUnavailable` when the device is
    /// leased by another session or cannot be opened.
    pub fn start(
        mut source: Box<dyn FrameSource>,
        settings: &SessionSettings,
        analyzer: &FrameAnalyzer,
    ) -> Result<Self, PipelineError> {
        if !analyzer.is_ready() {
            return Err(PipelineError::ModelLoadFailure(format!(
                "classifier '{}' is not ready",
                analyzer.classifier_name()
            )));
        }
        let device_id = source.device_id().to_string();
        let lease = DeviceLease::acquire(&device_id)?;
        source.open()?;

        let started_at = Instant::now();
        let deadline = settings.stream.max_duration.map(|d| started_at + d);
        log::info!(
            "session started on {} (threshold {}, confidence > {}, max duration {:?})",
            device_id,
            settings.filter.persistence_threshold,
            settings.filter.confidence_minimum,
            settings.stream.max_duration
        );
        Ok(Self {
            device: SessionDevice {
                source,
                lease: Some(lease),
            },
            device_id,
            filter: PersistenceFilter::new(
                settings.filter.persistence_threshold,
                settings.filter.confidence_minimum,
            ),
            state: SessionState::Streaming,
            started_at,
            deadline,
            cancel: CancelHandle::new(),
            stats: SessionStats::default(),
            last_error: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn filter(&self) -> &PersistenceFilter {
        &self.filter
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_device_released(&self) -> bool {
        self.device.is_released()
    }

    /// Capture and classify the next frame. `None` once the session stopped.
    pub fn next_observation(&mut self, analyzer: &mut FrameAnalyzer) -> Option<Observation> {
        loop {
            if self.state != SessionState::Streaming {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.stop(SessionState::StoppedDisconnect);
                return None;
            }
            if self.past_deadline(Instant::now()) {
                self.stop(SessionState::StoppedTimeout);
                return None;
            }

            let frame = match self.device.source.read() {
                Ok(frame) => frame,
                Err(PipelineError::EndOfStream) => {
                    self.stop(SessionState::StoppedNormal);
                    return None;
                }
                Err(err) if err.is_frame_local() => {
                    self.stats.skipped += 1;
                    log::warn!("{}: frame skipped: {}", self.device_id, err);
                    continue;
                }
                Err(err) => {
                    log::error!("{}: capture failed: {}", self.device_id, err);
                    self.last_error = Some(err.to_string());
                    self.stop(SessionState::StoppedError);
                    return None;
                }
            };
            self.stats.captured += 1;

            // A read that blocked past the deadline must not leak a late frame.
            if self.past_deadline(frame.captured_at()) {
                log::debug!(
                    "{}: frame {} captured after deadline, discarded",
                    self.device_id,
                    frame.sequence()
                );
                self.stop(SessionState::StoppedTimeout);
                return None;
            }

            return Some(match analyzer.analyze(&frame) {
                Ok(prediction) => {
                    let decision = self.filter.observe(&prediction);
                    log::debug!(
                        "{}: frame {} {} ({:.3}) run {}",
                        self.device_id,
                        frame.sequence(),
                        prediction.label.as_str(),
                        prediction.fall_confidence,
                        decision.counter
                    );
                    Observation {
                        frame,
                        prediction: Some(prediction),
                        decision: Some(decision),
                    }
                }
                Err(err) => {
                    self.stats.skipped += 1;
                    log::warn!(
                        "{}: frame {} not classified: {}",
                        self.device_id,
                        frame.sequence(),
                        err
                    );
                    Observation {
                        frame,
                        prediction: None,
                        decision: None,
                    }
                }
            });
        }
    }

    /// End the session as a consumer disconnect. No-op once stopped.
    pub fn disconnect(&mut self) {
        if !self.state.is_stopped() {
            self.stop(SessionState::StoppedDisconnect);
        }
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            device: self.device_id.clone(),
            state: self.state,
            stats: self.stats,
            error: self.last_error.clone(),
        }
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    fn past_deadline(&self, at: Instant) -> bool {
        self.deadline.map(|deadline| at > deadline).unwrap_or(false)
    }

    fn stop(&mut self, state: SessionState) {
        self.state = state;
        let source_stats = self.device.source.stats();
        if state == SessionState::StoppedError && !self.device.source.is_healthy() {
            log::warn!(
                "{}: source unhealthy after {} frames",
                source_stats.device,
                source_stats.frames_captured
            );
        }
        self.device.release();
        log::info!(
            "session on {} ended: {} (captured {}, yielded {}, skipped {}, dropped {}, alerts {})",
            self.device_id,
            state,
            self.stats.captured,
            self.stats.yielded,
            self.stats.skipped,
            self.stats.dropped,
            self.stats.alerts
        );
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ----------------------------------------------------------------------------
// Delivery
// ----------------------------------------------------------------------------

/// One encoded frame ready for the transport.
#[derive(Clone, Debug)]
pub struct StreamChunk {
    pub sequence: u64,
    pub captured_at: Instant,
    pub jpeg: Vec<u8>,
    /// The alert fired on this frame.
    pub triggered: bool,
    /// The banner was drawn on this frame.
    pub overlaid: bool,
    pub prediction: Option<Prediction>,
}

/// Consumer half: alert, overlay, encode.
pub struct FrameDelivery {
    annotator: FrameAnnotator,
    encoder: FrameEncoder,
    overlay: OverlayMode,
    sink: Box<dyn AlertSink>,
    message: String,
}

impl FrameDelivery {
    pub fn new(stream: &StreamSettings, sink: Box<dyn AlertSink>) -> Self {
        Self {
            annotator: FrameAnnotator::new(),
            encoder: FrameEncoder::new(stream.jpeg_quality),
            overlay: stream.overlay,
            sink,
            message: DEFAULT_ALERT_MESSAGE.to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn content_type(&self) -> &'static str {
        self.encoder.content_type()
    }

    /// Turn an observation into a chunk. `None` when the frame could not be
    /// encoded; the alert for a triggering frame is sent regardless.
    pub fn deliver(
        &mut self,
        observation: Observation,
        stats: &mut SessionStats,
    ) -> Option<StreamChunk> {
        let triggered = observation.triggered();
        if triggered {
            self.sink.notify(&FallAlert::new(self.message.as_str()));
            stats.alerts += 1;
        }

        let overlaid = match (self.overlay, observation.decision) {
            (_, None) => false,
            (OverlayMode::Trigger, Some(decision)) => decision.triggered,
            (OverlayMode::Confirmed, Some(decision)) => decision.confirmed,
        };
        let confidence = observation
            .prediction
            .map(|p| p.fall_confidence)
            .unwrap_or(0.0);
        let sequence = observation.frame.sequence();
        let captured_at = observation.frame.captured_at();
        let frame = self
            .annotator
            .annotate(observation.frame, overlaid, confidence);

        match self.encoder.encode(&frame) {
            Ok(jpeg) => {
                stats.yielded += 1;
                Some(StreamChunk {
                    sequence,
                    captured_at,
                    jpeg,
                    triggered,
                    overlaid,
                    prediction: observation.prediction,
                })
            }
            Err(err) => {
                stats.dropped += 1;
                log::warn!("frame {} dropped: {}", sequence, err);
                None
            }
        }
    }
}

// ----------------------------------------------------------------------------
// StreamPipeline
// ----------------------------------------------------------------------------

/// Long-lived pipeline: one classifier and one alert sink, any number of
/// consecutive sessions.
pub struct StreamPipeline {
    settings: SessionSettings,
    analyzer: FrameAnalyzer,
    delivery: FrameDelivery,
}

impl StreamPipeline {
    pub fn new(
        settings: SessionSettings,
        classifier: Box<dyn Classifier>,
        sink: Box<dyn AlertSink>,
    ) -> Self {
        Self {
            delivery: FrameDelivery::new(&settings.stream, sink),
            analyzer: FrameAnalyzer::new(classifier),
            settings,
        }
    }

    pub fn with_alert_message(mut self, message: impl Into<String>) -> Self {
        self.delivery = self.delivery.with_message(message);
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn classifier_name(&self) -> &'static str {
        self.analyzer.classifier_name()
    }

    pub fn is_ready(&self) -> bool {
        self.analyzer.is_ready()
    }

    /// Start a session on `source`. Chunks are produced as the stream is pulled.
    pub fn stream(&mut self, source: Box<dyn FrameSource>) -> Result<LiveStream<'_>, PipelineError> {
        let session = StreamSession::start(source, &self.settings, &self.analyzer)?;
        Ok(LiveStream {
            session,
            analyzer: &mut self.analyzer,
            delivery: &mut self.delivery,
        })
    }
}

/// A running session as a pull-based iterator of JPEG chunks.
///
/// Dropping the stream before it ends counts as a consumer disconnect.
pub struct LiveStream<'a> {
    session: StreamSession,
    analyzer: &'a mut FrameAnalyzer,
    delivery: &'a mut FrameDelivery,
}

impl LiveStream<'_> {
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.session.cancel_handle()
    }

    pub fn report(&self) -> SessionReport {
        self.session.report()
    }

    /// Stop now (if still streaming) and return the final report.
    pub fn close(mut self) -> SessionReport {
        self.session.disconnect();
        self.session.report()
    }
}

impl Iterator for LiveStream<'_> {
    type Item = StreamChunk;

    fn next(&mut self) -> Option<StreamChunk> {
        loop {
            let observation = self.session.next_observation(self.analyzer)?;
            if let Some(chunk) = self
                .delivery
                .deliver(observation, self.session.stats_mut())
            {
                return Some(chunk);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ClassMapping, StubBackend};
    use crate::ingest::{SourceStats, SyntheticConfig, SyntheticSource};
    use std::time::Duration;

    fn synthetic(device: &str, frames: u64) -> Box<dyn FrameSource> {
        Box::new(SyntheticSource::new(SyntheticConfig {
            device: device.to_string(),
            width: 64,
            height: 48,
            target_fps: 0,
            frame_limit: Some(frames),
            fall_every: 0,
            fall_frames: 0,
        }))
    }

    fn pipeline(scores: Vec<f32>) -> StreamPipeline {
        StreamPipeline::new(
            SessionSettings::default(),
            Box::new(StubBackend::scripted(scores, ClassMapping::default())),
            Box::new(crate::alert::LogSink),
        )
    }

    #[test]
    fn end_of_stream_stops_normally() {
        let mut pipeline = pipeline(vec![0.9]);
        let mut stream = pipeline.stream(synthetic("stub://pipeline-eos", 3)).unwrap();
        assert_eq!(stream.by_ref().count(), 3);
        let report = stream.report();
        assert_eq!(report.state, SessionState::StoppedNormal);
        assert_eq!(report.stats.captured, 3);
        assert_eq!(report.stats.yielded, 3);
        assert!(stream.session().is_device_released());
    }

    #[test]
    fn cancel_stops_before_next_capture() {
        let mut pipeline = pipeline(vec![0.9]);
        let mut stream = pipeline
            .stream(synthetic("stub://pipeline-cancel", 100))
            .unwrap();
        assert!(stream.next().is_some());
        stream.cancel_handle().cancel();
        assert!(stream.next().is_none());
        assert_eq!(stream.state(), SessionState::StoppedDisconnect);
        assert_eq!(stream.report().stats.captured, 1);
    }

    #[test]
    fn close_reports_disconnect() {
        let mut pipeline = pipeline(vec![0.9]);
        let mut stream = pipeline
            .stream(synthetic("stub://pipeline-close", 100))
            .unwrap();
        stream.next();
        let report = stream.close();
        assert_eq!(report.state, SessionState::StoppedDisconnect);
        assert!(!DeviceLease::is_leased("stub://pipeline-close"));
    }

    #[test]
    fn zero_duration_session_times_out() {
        let mut settings = SessionSettings::default();
        settings.stream.max_duration = Some(Duration::ZERO);
        let mut pipeline = StreamPipeline::new(
            settings,
            Box::new(StubBackend::scripted(vec![0.9], ClassMapping::default())),
            Box::new(crate::alert::LogSink),
        );
        let mut stream = pipeline
            .stream(synthetic("stub://pipeline-timeout", 100))
            .unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert!(stream.next().is_none());
        assert_eq!(stream.state(), SessionState::StoppedTimeout);
    }

    struct FailingSource {
        opened: bool,
    }

    impl FrameSource for FailingSource {
        fn device_id(&self) -> &str {
            "stub://pipeline-failing"
        }
        fn open(&mut self) -> Result<(), PipelineError> {
            self.opened = true;
            Ok(())
        }
        fn read(&mut self) -> Result<Frame, PipelineError> {
            Err(PipelineError::capture_failed("stub://pipeline-failing", "unplugged"))
        }
        fn close(&mut self) {
            self.opened = false;
        }
        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    #[test]
    fn capture_failure_stops_with_error() {
        let mut pipeline = pipeline(vec![0.9]);
        let mut stream = pipeline
            .stream(Box::new(FailingSource { opened: false }))
            .unwrap();
        assert!(stream.next().is_none());
        let report = stream.report();
        assert_eq!(report.state, SessionState::StoppedError);
        assert!(report.error.unwrap().contains("unplugged"));
    }

    #[test]
    fn trigger_overlay_marks_only_the_alert_frame() {
        let mut settings = SessionSettings::default();
        settings.filter.persistence_threshold = 2;
        settings.stream.overlay = OverlayMode::Trigger;
        let mut pipeline = StreamPipeline::new(
            settings,
            Box::new(StubBackend::scripted(vec![0.01], ClassMapping::default())),
            Box::new(crate::alert::LogSink),
        );
        let chunks: Vec<StreamChunk> = pipeline
            .stream(synthetic("stub://pipeline-overlay", 4))
            .unwrap()
            .collect();
        let overlaid: Vec<bool> = chunks.iter().map(|c| c.overlaid).collect();
        assert_eq!(overlaid, vec![false, true, false, false]);
    }
}
