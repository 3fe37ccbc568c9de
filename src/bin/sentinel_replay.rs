//! sentinel_replay - run the fall pipeline offline over a recorded source.
//!
//! Feeds a directory of stills, a video file or a synthetic scene through the
//! same session the daemon uses, then:
//! 1. Writes every annotated frame as `frame_NNNNNN.jpg` (with `--out`)
//! 2. Prints one JSON line per alert to stdout, as the alert fires
//! 3. Logs the session report when the source is exhausted

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use fall_sentinel::{
    load_classifier, source_from_settings, JsonLinesSink, LogSink, MultiSink, OverlayMode,
    SentinelConfig, SessionState, StreamPipeline,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a recorded source through the fall pipeline")]
struct Args {
    /// Source uri: a directory of stills, a video file, or stub://name?frames=N.
    #[arg(long)]
    source: String,

    /// Directory for annotated JPEG frames. Nothing is written without it.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Classifier backend: tract or stub.
    #[arg(long)]
    backend: Option<String>,

    /// ONNX model path for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Consecutive qualifying frames before an alert.
    #[arg(long)]
    threshold: Option<u32>,

    /// Minimum fall confidence for a frame to qualify.
    #[arg(long)]
    confidence: Option<f32>,

    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<u64>,

    /// Replay speed cap in frames per second. 0 replays as fast as possible.
    #[arg(long, default_value_t = 0)]
    fps: u32,

    /// Draw the banner only on the frame where an alert fires.
    #[arg(long)]
    trigger_overlay: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = SentinelConfig::load_from(args.config.as_deref())?;
    config.source.uri = args.source.clone();
    config.source.target_fps = args.fps;
    if let Some(backend) = args.backend {
        config.model.backend = backend;
    }
    if let Some(model) = args.model {
        config.model.path = Some(model);
    }
    if let Some(threshold) = args.threshold {
        config.filter.persistence_threshold = threshold;
    }
    if let Some(confidence) = args.confidence {
        config.filter.confidence_minimum = confidence;
    }
    if let Some(seconds) = args.duration {
        config.stream.max_duration = (seconds > 0).then(|| Duration::from_secs(seconds));
    }
    if args.trigger_overlay {
        config.stream.overlay = OverlayMode::Trigger;
    }
    config.validate()?;

    if let Some(out) = &args.out {
        std::fs::create_dir_all(out)
            .with_context(|| format!("create output directory {}", out.display()))?;
    }

    let classifier =
        load_classifier(&config.model).context("refusing to replay without a usable model")?;
    let source = source_from_settings(&config.source).context("invalid source")?;
    // Alert lines go out from the sink, so a frame that fails to encode still reports.
    let sink = MultiSink::new()
        .with(LogSink)
        .with(JsonLinesSink::new(std::io::stdout()));
    let mut pipeline = StreamPipeline::new(config.session_settings(), classifier, Box::new(sink))
        .with_alert_message(config.alert.message.clone());

    let mut live = pipeline
        .stream(source)
        .with_context(|| format!("start session on {}", config.source.uri))?;
    let cancel = live.cancel_handle();
    ctrlc::set_handler(move || cancel.cancel()).context("error setting Ctrl-C handler")?;

    for chunk in live.by_ref() {
        if let Some(out) = &args.out {
            let path = out.join(format!("frame_{:06}.jpg", chunk.sequence));
            std::fs::write(&path, &chunk.jpeg)
                .with_context(|| format!("write {}", path.display()))?;
        }
        if chunk.triggered {
            log::info!(
                "fall alert on frame {} (confidence {:.3})",
                chunk.sequence,
                chunk
                    .prediction
                    .map(|p| p.fall_confidence)
                    .unwrap_or_default()
            );
        }
    }

    let report = live.close();
    log::info!(
        "replay finished: {} (captured {}, yielded {}, skipped {}, dropped {}, alerts {})",
        report.state,
        report.stats.captured,
        report.stats.yielded,
        report.stats.skipped,
        report.stats.dropped,
        report.stats.alerts
    );
    if report.state == SessionState::StoppedError {
        anyhow::bail!(
            "capture failed: {}",
            report.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}
