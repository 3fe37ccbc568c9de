//! sentineld - fall detection daemon
//!
//! This daemon:
//! 1. Loads configuration (file + environment, then command-line overrides)
//! 2. Loads the classifier and refuses to start without a usable model
//! 3. Wires alert sinks (log, `/alerts` listeners, optional MQTT)
//! 4. Serves `/video_feed`, `/alerts` and `/health` until Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use fall_sentinel::{
    load_classifier, source_from_settings, AlertHub, LogSink, MultiSink, SentinelConfig,
    ServerConfig, SourceFactory, StreamPipeline, StreamServer,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Fall detection daemon: live annotated MJPEG stream and fall alerts"
)]
struct Args {
    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address.
    #[arg(long)]
    listen: Option<String>,

    /// Source uri: stub://name, a directory of stills, /dev/videoN, http(s)://, or a video file.
    #[arg(long)]
    source: Option<String>,

    /// Classifier backend: tract or stub.
    #[arg(long)]
    backend: Option<String>,

    /// ONNX model path for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = SentinelConfig::load_from(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(source) = args.source {
        config.source.uri = source;
    }
    if let Some(backend) = args.backend {
        config.model.backend = backend;
    }
    if let Some(model) = args.model {
        config.model.path = Some(model);
    }
    config.validate()?;

    let classifier =
        load_classifier(&config.model).context("refusing to start without a usable model")?;
    // Catch a bad uri or a missing ingest feature now rather than on the first client.
    source_from_settings(&config.source).context("invalid source")?;

    let hub = AlertHub::new();
    let sink = MultiSink::new().with(LogSink).with(hub.clone());
    let sink = with_mqtt(sink, &config)?;
    log::info!("alert sinks configured: {}", sink.len());

    let pipeline = StreamPipeline::new(config.session_settings(), classifier, Box::new(sink))
        .with_alert_message(config.alert.message.clone());

    let source_settings = config.source.clone();
    let factory: SourceFactory = Arc::new(move || source_from_settings(&source_settings));
    let server_config = ServerConfig {
        addr: config.listen_addr.clone(),
        source_label: config.source.uri.clone(),
    };
    let handle = StreamServer::new(server_config, pipeline, hub, factory).spawn()?;
    log::info!(
        "sentineld running: source {}, backend {}, threshold {}, confidence > {}",
        config.source.uri,
        config.model.backend,
        config.filter.persistence_threshold,
        config.filter.confidence_minimum
    );
    log::info!("live stream at http://{}/video_feed", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("sentineld waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping stream server...");
    handle.stop()?;

    Ok(())
}

#[cfg(feature = "alert-mqtt")]
fn with_mqtt(sink: MultiSink, config: &SentinelConfig) -> Result<MultiSink> {
    match &config.alert.mqtt {
        Some(mqtt) => {
            let mqtt_sink = fall_sentinel::alert::MqttSink::connect(mqtt)
                .with_context(|| format!("connect MQTT broker {}", mqtt.broker))?;
            Ok(sink.with(mqtt_sink))
        }
        None => Ok(sink),
    }
}

#[cfg(not(feature = "alert-mqtt"))]
fn with_mqtt(sink: MultiSink, config: &SentinelConfig) -> Result<MultiSink> {
    if let Some(mqtt) = &config.alert.mqtt {
        log::warn!(
            "MQTT broker {} configured but this build lacks the alert-mqtt feature; MQTT alerts disabled",
            mqtt.broker
        );
    }
    Ok(sink)
}
