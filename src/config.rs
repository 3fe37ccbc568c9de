use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::DEFAULT_ALERT_MESSAGE;
use crate::detect::DEFAULT_FALL_CLASS_INDEX;
use crate::encode::DEFAULT_JPEG_QUALITY;
use crate::filter::{DEFAULT_CONFIDENCE_MINIMUM, DEFAULT_PERSISTENCE_THRESHOLD};
use crate::preprocess::MODEL_INPUT_SIZE;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8780";
const DEFAULT_SOURCE_URI: &str = "stub://camera";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_BACKEND: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "fall_detection_model.onnx";
const DEFAULT_MQTT_TOPIC: &str = "fall-sentinel/alerts";
const DEFAULT_MQTT_CLIENT_ID: &str = "fall-sentinel";
const KNOWN_BACKENDS: [&str; 2] = ["tract", "stub"];

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    listen_addr: Option<String>,
    source: Option<SourceConfigFile>,
    model: Option<ModelConfigFile>,
    filter: Option<FilterConfigFile>,
    stream: Option<StreamConfigFile>,
    alert: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(rename = "loop")]
    loop_files: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    fall_class_index: Option<usize>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterConfigFile {
    persistence_threshold: Option<u32>,
    confidence_minimum: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    /// Seconds per session. Absent or 0 means unbounded.
    duration_seconds: Option<u64>,
    jpeg_quality: Option<u8>,
    overlay: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    message: Option<String>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub listen_addr: String,
    pub source: SourceSettings,
    pub model: ModelSettings,
    pub filter: FilterSettings,
    pub stream: StreamSettings,
    pub alert: AlertSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub uri: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Directory sources start over after the last still.
    pub loop_files: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_SOURCE_URI.to_string(),
            target_fps: DEFAULT_SOURCE_FPS,
            width: DEFAULT_SOURCE_WIDTH,
            height: DEFAULT_SOURCE_HEIGHT,
            loop_files: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    /// `tract` or `stub`.
    pub backend: String,
    pub path: Option<PathBuf>,
    /// Output index that means "fall".
    pub fall_class_index: usize,
    pub input_size: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            path: Some(PathBuf::from(DEFAULT_MODEL_PATH)),
            fall_class_index: DEFAULT_FALL_CLASS_INDEX,
            input_size: MODEL_INPUT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    pub persistence_threshold: u32,
    pub confidence_minimum: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            persistence_threshold: DEFAULT_PERSISTENCE_THRESHOLD,
            confidence_minimum: DEFAULT_CONFIDENCE_MINIMUM,
        }
    }
}

/// When the banner is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlayMode {
    /// Every frame of a run at or past the threshold.
    #[default]
    Confirmed,
    /// Only the frame where the alert fires.
    Trigger,
}

impl std::str::FromStr for OverlayMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Ok(Self::Confirmed),
            "trigger" => Ok(Self::Trigger),
            other => Err(anyhow!(
                "overlay must be 'confirmed' or 'trigger', got '{}'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// `None` streams until the source ends or the client leaves. A file
    /// `duration_seconds` of 0 and `STREAM_DURATION_SECONDS=0|unbounded` both
    /// map to `None`.
    pub max_duration: Option<Duration>,
    pub jpeg_quality: u8,
    pub overlay: OverlayMode,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_duration: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            overlay: OverlayMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertSettings {
    pub message: String,
    pub mqtt: Option<MqttSettings>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            message: DEFAULT_ALERT_MESSAGE.to_string(),
            mqtt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    /// `host:port` or `mqtt://host:port`.
    pub broker: String,
    pub topic: String,
    pub client_id: String,
}

/// Everything one streaming session needs, detached from the daemon config.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionSettings {
    pub filter: FilterSettings,
    pub stream: StreamSettings,
}

impl SentinelConfig {
    /// Defaults, then the file named by `SENTINEL_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = env_value("SENTINEL_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like [`SentinelConfig::load`] with an explicit file instead of `SENTINEL_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SentinelConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            filter: self.filter,
            stream: self.stream,
        }
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let listen_addr = file
            .listen_addr
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());

        let source_file = file.source.unwrap_or_default();
        let defaults = SourceSettings::default();
        let source = SourceSettings {
            uri: source_file.uri.unwrap_or(defaults.uri),
            target_fps: source_file.target_fps.unwrap_or(defaults.target_fps),
            width: source_file.width.unwrap_or(defaults.width),
            height: source_file.height.unwrap_or(defaults.height),
            loop_files: source_file.loop_files.unwrap_or(defaults.loop_files),
        };

        let model_file = file.model.unwrap_or_default();
        let defaults = ModelSettings::default();
        let model = ModelSettings {
            backend: model_file.backend.unwrap_or(defaults.backend),
            path: model_file.path.or(defaults.path),
            fall_class_index: model_file
                .fall_class_index
                .unwrap_or(defaults.fall_class_index),
            input_size: model_file.input_size.unwrap_or(defaults.input_size),
        };

        let filter_file = file.filter.unwrap_or_default();
        let filter = FilterSettings {
            persistence_threshold: filter_file
                .persistence_threshold
                .unwrap_or(DEFAULT_PERSISTENCE_THRESHOLD),
            confidence_minimum: filter_file
                .confidence_minimum
                .unwrap_or(DEFAULT_CONFIDENCE_MINIMUM),
        };

        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            max_duration: duration_from_seconds(stream_file.duration_seconds.unwrap_or(0)),
            jpeg_quality: stream_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            overlay: match stream_file.overlay {
                Some(overlay) => overlay.parse()?,
                None => OverlayMode::default(),
            },
        };

        let alert_file = file.alert.unwrap_or_default();
        let mqtt = match alert_file.mqtt {
            Some(mqtt) => Some(MqttSettings {
                broker: mqtt
                    .broker
                    .ok_or_else(|| anyhow!("alert.mqtt.broker is required when alert.mqtt is set"))?,
                topic: mqtt.topic.unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            }),
            None => None,
        };
        let alert = AlertSettings {
            message: alert_file
                .message
                .unwrap_or_else(|| DEFAULT_ALERT_MESSAGE.to_string()),
            mqtt,
        };

        Ok(Self {
            listen_addr,
            source,
            model,
            filter,
            stream,
            alert,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_value("FALL_PERSISTENCE_THRESHOLD") {
            self.filter.persistence_threshold = value
                .parse()
                .map_err(|_| anyhow!("FALL_PERSISTENCE_THRESHOLD must be a positive integer"))?;
        }
        if let Some(value) = env_value("CONFIDENCE_MINIMUM") {
            self.filter.confidence_minimum = value
                .parse()
                .map_err(|_| anyhow!("CONFIDENCE_MINIMUM must be a number in [0, 1]"))?;
        }
        if let Some(value) = env_value("STREAM_DURATION_SECONDS") {
            self.stream.max_duration = if value.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                let seconds: u64 = value.parse().map_err(|_| {
                    anyhow!("STREAM_DURATION_SECONDS must be an integer number of seconds or 'unbounded'")
                })?;
                duration_from_seconds(seconds)
            };
        }
        if let Some(value) = env_value("MODEL_INPUT_SIZE") {
            self.model.input_size = value
                .parse()
                .map_err(|_| anyhow!("MODEL_INPUT_SIZE must be an integer"))?;
        }
        if let Some(value) = env_value("FALL_CLASS_INDEX") {
            self.model.fall_class_index = value
                .parse()
                .map_err(|_| anyhow!("FALL_CLASS_INDEX must be 0 or 1"))?;
        }
        if let Some(value) = env_value("SENTINEL_SOURCE") {
            self.source.uri = value;
        }
        if let Some(value) = env_value("SENTINEL_TARGET_FPS") {
            self.source.target_fps = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_TARGET_FPS must be an integer"))?;
        }
        if let Some(value) = env_value("SENTINEL_BACKEND") {
            self.model.backend = value;
        }
        if let Some(value) = env_value("SENTINEL_MODEL_PATH") {
            self.model.path = Some(PathBuf::from(value));
        }
        if let Some(value) = env_value("SENTINEL_LISTEN_ADDR") {
            self.listen_addr = value;
        }
        if let Some(value) = env_value("SENTINEL_JPEG_QUALITY") {
            self.stream.jpeg_quality = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_JPEG_QUALITY must be an integer in 1..=100"))?;
        }
        if let Some(value) = env_value("SENTINEL_OVERLAY") {
            self.stream.overlay = value.parse()?;
        }
        if let Some(broker) = env_value("SENTINEL_MQTT_BROKER") {
            let mqtt = self.alert.mqtt.get_or_insert_with(|| MqttSettings {
                broker: String::new(),
                topic: DEFAULT_MQTT_TOPIC.to_string(),
                client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
            });
            mqtt.broker = broker;
        }
        if let Some(topic) = env_value("SENTINEL_MQTT_TOPIC") {
            let mqtt = self.alert.mqtt.as_mut().ok_or_else(|| {
                anyhow!("SENTINEL_MQTT_TOPIC is set but no MQTT broker is configured")
            })?;
            mqtt.topic = topic;
        }
        Ok(())
    }

    /// Check ranges and normalize names. Call again after editing fields.
    pub fn validate(&mut self) -> Result<()> {
        if self.filter.persistence_threshold == 0 {
            return Err(anyhow!("persistence threshold must be at least 1"));
        }
        let minimum = self.filter.confidence_minimum;
        if !minimum.is_finite() || !(0.0..=1.0).contains(&minimum) {
            return Err(anyhow!(
                "confidence minimum must be within [0, 1], got {}",
                minimum
            ));
        }
        if self.model.input_size != MODEL_INPUT_SIZE {
            return Err(anyhow!(
                "model input size must be {}, got {}",
                MODEL_INPUT_SIZE,
                self.model.input_size
            ));
        }
        if self.model.fall_class_index > 1 {
            return Err(anyhow!(
                "fall class index must be 0 or 1, got {}",
                self.model.fall_class_index
            ));
        }
        self.model.backend = self.model.backend.trim().to_ascii_lowercase();
        if !KNOWN_BACKENDS.contains(&self.model.backend.as_str()) {
            return Err(anyhow!(
                "unknown classifier backend '{}'; expected one of {:?}",
                self.model.backend,
                KNOWN_BACKENDS
            ));
        }
        if self.stream.jpeg_quality == 0 || self.stream.jpeg_quality > 100 {
            return Err(anyhow!(
                "jpeg quality must be within 1..=100, got {}",
                self.stream.jpeg_quality
            ));
        }
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("source uri must not be empty"));
        }
        if let Some(mqtt) = &self.alert.mqtt {
            if mqtt.broker.trim().is_empty() || mqtt.topic.trim().is_empty() {
                return Err(anyhow!("mqtt alerts require a broker and a topic"));
            }
        }
        Ok(())
    }
}

fn duration_from_seconds(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
