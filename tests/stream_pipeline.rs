use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fall_sentinel::{
    AlertSink, ClassMapping, DeviceLease, FallAlert, Frame, FrameSource, OverlayMode,
    PipelineError, SessionSettings, SessionState, SourceStats, StreamChunk, StreamPipeline,
    StubBackend,
};

// Raw model scores under the default mapping (index 0 = fall).
const F: f32 = 0.05;
const N: f32 = 0.95;

#[derive(Clone, Default)]
struct Counters {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl Counters {
    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// What the source hands out for one `read` call.
#[derive(Clone, Copy, Debug)]
enum Shot {
    /// A well-formed 32x24 grey frame.
    Grey,
    /// Pixel buffer shorter than the declared geometry.
    ShortBuffer,
    /// Valid raster wider than a JPEG can hold.
    TooWide,
    /// The device fails mid-session.
    Unplugged,
}

/// Uniform grey frames, optionally slow or scripted, counting open/close calls.
struct CountingSource {
    device: String,
    limit: Option<u64>,
    script: Option<Vec<Shot>>,
    delay: Duration,
    produced: u64,
    counters: Counters,
}

impl CountingSource {
    fn new(device: &str, limit: Option<u64>, counters: &Counters) -> Self {
        Self {
            device: device.to_string(),
            limit,
            script: None,
            delay: Duration::ZERO,
            produced: 0,
            counters: counters.clone(),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Replay `script` one entry per read, then end the stream.
    fn scripted(device: &str, script: Vec<Shot>, counters: &Counters) -> Self {
        let mut source = Self::new(device, None, counters);
        source.script = Some(script);
        source
    }
}

impl FrameSource for CountingSource {
    fn device_id(&self) -> &str {
        &self.device
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, PipelineError> {
        if self.limit.map(|limit| self.produced >= limit).unwrap_or(false) {
            return Err(PipelineError::EndOfStream);
        }
        let shot = match &self.script {
            Some(script) => match script.get(self.produced as usize) {
                Some(shot) => *shot,
                None => return Err(PipelineError::EndOfStream),
            },
            None => Shot::Grey,
        };
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.produced += 1;
        let sequence = self.produced;
        match shot {
            Shot::Grey => Ok(Frame::from_raw(vec![128; 32 * 24 * 3], 32, 24, 3, sequence)),
            Shot::ShortBuffer => Ok(Frame::from_raw(vec![128; 100], 32, 24, 3, sequence)),
            Shot::TooWide => Ok(Frame::from_raw(vec![128; 70_000 * 2 * 3], 70_000, 2, 3, sequence)),
            Shot::Unplugged => Err(PipelineError::capture_failed(self.device.as_str(), "unplugged")),
        }
    }

    fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.produced,
            device: self.device.clone(),
        }
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    alerts: Arc<Mutex<Vec<FallAlert>>>,
}

impl AlertSink for RecordingSink {
    fn notify(&mut self, alert: &FallAlert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

fn scripted_pipeline(scores: Vec<f32>, settings: SessionSettings, sink: RecordingSink) -> StreamPipeline {
    StreamPipeline::new(
        settings,
        Box::new(StubBackend::scripted(scores, ClassMapping::default())),
        Box::new(sink),
    )
}

fn triggered_indices(chunks: &[StreamChunk]) -> Vec<usize> {
    chunks
        .iter()
        .enumerate()
        .filter(|(_, chunk)| chunk.triggered)
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn two_fall_episodes_raise_two_alerts() {
    let counters = Counters::default();
    let sink = RecordingSink::default();
    let scores = vec![F, F, F, F, F, N, F, F, F, F, F];
    let mut pipeline = scripted_pipeline(scores, SessionSettings::default(), sink.clone());

    let source = CountingSource::new("test://two-episodes", Some(11), &counters);
    let chunks: Vec<StreamChunk> = pipeline.stream(Box::new(source)).unwrap().collect();

    assert_eq!(chunks.len(), 11);
    assert_eq!(triggered_indices(&chunks), vec![4, 10]);
    let alerts = sink.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].event, "fall_alert");
    assert_eq!(alerts[0].payload.message, "Fall detected!");
}

#[test]
fn sustained_fall_alerts_once() {
    let counters = Counters::default();
    let sink = RecordingSink::default();
    let mut pipeline = scripted_pipeline(vec![F; 7], SessionSettings::default(), sink.clone());

    let source = CountingSource::new("test://sustained", Some(7), &counters);
    let chunks: Vec<StreamChunk> = pipeline.stream(Box::new(source)).unwrap().collect();

    assert_eq!(triggered_indices(&chunks), vec![4]);
    assert_eq!(sink.alerts.lock().unwrap().len(), 1);

    // Confirmed overlay: banner from the trigger frame onward.
    let overlaid: Vec<bool> = chunks.iter().map(|c| c.overlaid).collect();
    assert_eq!(overlaid, vec![false, false, false, false, true, true, true]);
}

#[test]
fn trigger_overlay_draws_only_on_alert_frame() {
    let counters = Counters::default();
    let mut settings = SessionSettings::default();
    settings.stream.overlay = OverlayMode::Trigger;
    let mut pipeline = scripted_pipeline(vec![F; 7], settings, RecordingSink::default());

    let source = CountingSource::new("test://trigger-overlay", Some(7), &counters);
    let chunks: Vec<StreamChunk> = pipeline.stream(Box::new(source)).unwrap().collect();

    let overlaid: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.overlaid)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(overlaid, vec![4]);
}

#[test]
fn chunks_decode_at_source_resolution() {
    let counters = Counters::default();
    let mut pipeline = scripted_pipeline(vec![N], SessionSettings::default(), RecordingSink::default());

    let source = CountingSource::new("test://decode", Some(2), &counters);
    let chunks: Vec<StreamChunk> = pipeline.stream(Box::new(source)).unwrap().collect();

    assert_eq!(chunks.len(), 2);
    for chunk in &chunks {
        let decoded = image::load_from_memory(&chunk.jpeg).expect("chunk is a standalone JPEG");
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }
}

#[test]
fn inference_failure_keeps_the_run_and_still_streams() {
    let counters = Counters::default();
    let sink = RecordingSink::default();
    let scores = vec![F, F, f32::NAN, F, F, F];
    let mut pipeline = scripted_pipeline(scores, SessionSettings::default(), sink.clone());

    let source = CountingSource::new("test://nan", Some(6), &counters);
    let mut live = pipeline.stream(Box::new(source)).unwrap();
    let chunks: Vec<StreamChunk> = live.by_ref().collect();
    let report = live.close();

    assert_eq!(chunks.len(), 6);
    assert!(chunks[2].prediction.is_none());
    assert!(!chunks[2].overlaid);
    // Run of two survives the failed frame and reaches five on the last frame.
    assert_eq!(triggered_indices(&chunks), vec![5]);
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(report.stats.yielded, 6);
    assert_eq!(report.stats.alerts, 1);
}

#[test]
fn end_of_stream_releases_device_once() {
    let counters = Counters::default();
    let mut pipeline = scripted_pipeline(vec![N], SessionSettings::default(), RecordingSink::default());

    let source = CountingSource::new("test://eos-release", Some(3), &counters);
    let mut live = pipeline.stream(Box::new(source)).unwrap();
    assert_eq!(live.by_ref().count(), 3);
    assert_eq!(live.state(), SessionState::StoppedNormal);
    assert_eq!(counters.closes(), 1);

    let report = live.close();
    assert_eq!(report.state, SessionState::StoppedNormal);
    assert_eq!(counters.opens(), 1);
    assert_eq!(counters.closes(), 1);
    assert!(!DeviceLease::is_leased("test://eos-release"));
}

#[test]
fn timeout_releases_device_once_and_never_yields_late_frames() {
    let counters = Counters::default();
    let mut settings = SessionSettings::default();
    settings.stream.max_duration = Some(Duration::from_millis(120));
    let mut pipeline = scripted_pipeline(vec![N], settings, RecordingSink::default());

    let source = CountingSource::new("test://timeout", None, &counters)
        .with_delay(Duration::from_millis(25));
    let mut live = pipeline.stream(Box::new(source)).unwrap();
    let deadline = live.session().deadline().expect("bounded session");
    let chunks: Vec<StreamChunk> = live.by_ref().collect();

    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|chunk| chunk.captured_at <= deadline));
    assert_eq!(live.state(), SessionState::StoppedTimeout);
    assert_eq!(counters.closes(), 1);

    drop(live);
    assert_eq!(counters.closes(), 1);
    assert!(!DeviceLease::is_leased("test://timeout"));
}

#[test]
fn consumer_cancel_releases_device_once() {
    let counters = Counters::default();
    let mut pipeline = scripted_pipeline(vec![N], SessionSettings::default(), RecordingSink::default());

    let source = CountingSource::new("test://cancel", None, &counters);
    let mut live = pipeline.stream(Box::new(source)).unwrap();
    assert!(live.next().is_some());
    live.cancel_handle().cancel();
    assert!(live.next().is_none());
    assert_eq!(live.state(), SessionState::StoppedDisconnect);

    let report = live.close();
    assert_eq!(report.state, SessionState::StoppedDisconnect);
    assert_eq!(counters.closes(), 1);
}

#[test]
fn dropping_the_stream_counts_as_disconnect() {
    let counters = Counters::default();
    let mut pipeline = scripted_pipeline(vec![N], SessionSettings::default(), RecordingSink::default());

    let source = CountingSource::new("test://drop", None, &counters);
    {
        let mut live = pipeline.stream(Box::new(source)).unwrap();
        live.next();
        live.next();
    }
    assert_eq!(counters.closes(), 1);
    assert!(!DeviceLease::is_leased("test://drop"));
}

#[test]
fn second_session_on_busy_device_fails_fast() {
    let first_counters = Counters::default();
    let second_counters = Counters::default();
    let mut first = scripted_pipeline(vec![N], SessionSettings::default(), RecordingSink::default());
    let mut second = scripted_pipeline(vec![N], SessionSettings::default(), RecordingSink::default());

    let mut live = first
        .stream(Box::new(CountingSource::new("test://busy", None, &first_counters)))
        .unwrap();
    assert!(live.next().is_some());

    let err = second
        .stream(Box::new(CountingSource::new("test://busy", None, &second_counters)))
        .err()
        .expect("device is leased");
    assert!(matches!(err, PipelineError::DeviceUnavailable { .. }));
    assert_eq!(second_counters.opens(), 0);

    live.close();
    assert!(second
        .stream(Box::new(CountingSource::new("test://busy", Some(1), &second_counters)))
        .is_ok());
}

#[test]
fn unready_classifier_refuses_to_open_the_device() {
    let counters = Counters::default();
    let mut pipeline = StreamPipeline::new(
        SessionSettings::default(),
        Box::new(StubBackend::unready()),
        Box::new(RecordingSink::default()),
    );
    assert!(!pipeline.is_ready());

    let err = pipeline
        .stream(Box::new(CountingSource::new("test://unready", None, &counters)))
        .err()
        .expect("no model");
    assert!(matches!(err, PipelineError::ModelLoadFailure(_)));
    assert_eq!(counters.opens(), 0);
    assert!(!DeviceLease::is_leased("test://unready"));
}

#[test]
fn pipeline_serves_consecutive_sessions() {
    let counters = Counters::default();
    let sink = RecordingSink::default();
    let mut pipeline = scripted_pipeline(vec![F; 5], SessionSettings::default(), sink.clone());

    for _ in 0..2 {
        let source = CountingSource::new("test://consecutive", Some(5), &counters);
        let chunks: Vec<StreamChunk> = pipeline.stream(Box::new(source)).unwrap().collect();
        assert_eq!(triggered_indices(&chunks), vec![4]);
    }
    // Each session starts with a fresh filter.
    assert_eq!(sink.alerts.lock().unwrap().len(), 2);
    assert_eq!(counters.closes(), 2);
}

#[test]
fn malformed_frame_is_skipped_without_breaking_the_run() {
    let counters = Counters::default();
    let sink = RecordingSink::default();
    let script = vec![
        Shot::Grey,
        Shot::Grey,
        Shot::ShortBuffer,
        Shot::Grey,
        Shot::Grey,
        Shot::Grey,
    ];
    let mut pipeline = scripted_pipeline(vec![F], SessionSettings::default(), sink.clone());

    let source = CountingSource::scripted("test://short-buffer", script, &counters);
    let mut live = pipeline.stream(Box::new(source)).unwrap();
    let chunks: Vec<StreamChunk> = live.by_ref().collect();
    let report = live.close();

    // The bad frame cannot be classified or encoded; the run of falls spans it.
    assert_eq!(chunks.len(), 5);
    let triggered: Vec<u64> = chunks
        .iter()
        .filter(|c| c.triggered)
        .map(|c| c.sequence)
        .collect();
    assert_eq!(triggered, vec![6]);
    assert_eq!(report.state, SessionState::StoppedNormal);
    assert_eq!(report.stats.captured, 6);
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(report.stats.dropped, 1);
    assert_eq!(report.stats.yielded, 5);
    assert_eq!(report.stats.alerts, 1);
    assert_eq!(counters.closes(), 1);
}

#[test]
fn unencodable_trigger_frame_still_alerts_and_the_session_continues() {
    let counters = Counters::default();
    let sink = RecordingSink::default();
    let mut settings = SessionSettings::default();
    settings.filter.persistence_threshold = 2;
    let script = vec![Shot::Grey, Shot::TooWide, Shot::Grey];
    let mut pipeline = scripted_pipeline(vec![F], settings, sink.clone());

    let source = CountingSource::scripted("test://too-wide", script, &counters);
    let mut live = pipeline.stream(Box::new(source)).unwrap();
    let chunks: Vec<StreamChunk> = live.by_ref().collect();
    let report = live.close();

    let sequences: Vec<u64> = chunks.iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![1, 3]);
    assert!(chunks.iter().all(|c| !c.triggered));
    assert_eq!(sink.alerts.lock().unwrap().len(), 1);
    assert_eq!(report.state, SessionState::StoppedNormal);
    assert_eq!(report.stats.skipped, 0);
    assert_eq!(report.stats.dropped, 1);
    assert_eq!(report.stats.yielded, 2);
    assert_eq!(report.stats.alerts, 1);
}

#[test]
fn capture_failure_releases_device_once() {
    let counters = Counters::default();
    let script = vec![Shot::Grey, Shot::Grey, Shot::Unplugged, Shot::Grey];
    let mut pipeline = scripted_pipeline(vec![N], SessionSettings::default(), RecordingSink::default());

    let source = CountingSource::scripted("test://unplugged", script, &counters);
    let mut live = pipeline.stream(Box::new(source)).unwrap();
    let chunks: Vec<StreamChunk> = live.by_ref().collect();
    assert_eq!(chunks.len(), 2);
    assert_eq!(live.state(), SessionState::StoppedError);
    assert_eq!(counters.closes(), 1);

    let report = live.close();
    assert_eq!(report.state, SessionState::StoppedError);
    assert!(report.error.expect("error recorded").contains("unplugged"));
    assert_eq!(report.stats.captured, 2);
    assert_eq!(counters.opens(), 1);
    assert_eq!(counters.closes(), 1);
    assert!(!DeviceLease::is_leased("test://unplugged"));
}
