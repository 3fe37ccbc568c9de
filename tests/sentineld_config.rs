use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use fall_sentinel::config::{OverlayMode, SentinelConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "FALL_PERSISTENCE_THRESHOLD",
        "CONFIDENCE_MINIMUM",
        "STREAM_DURATION_SECONDS",
        "MODEL_INPUT_SIZE",
        "FALL_CLASS_INDEX",
        "SENTINEL_SOURCE",
        "SENTINEL_TARGET_FPS",
        "SENTINEL_BACKEND",
        "SENTINEL_MODEL_PATH",
        "SENTINEL_LISTEN_ADDR",
        "SENTINEL_JPEG_QUALITY",
        "SENTINEL_OVERLAY",
        "SENTINEL_MQTT_BROKER",
        "SENTINEL_MQTT_TOPIC",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SentinelConfig::load().expect("load defaults");

    assert_eq!(cfg.filter.persistence_threshold, 5);
    assert!((cfg.filter.confidence_minimum - 0.8).abs() < f32::EPSILON);
    assert_eq!(cfg.model.input_size, 150);
    assert_eq!(cfg.model.fall_class_index, 0);
    assert_eq!(cfg.model.backend, "tract");
    assert_eq!(cfg.stream.max_duration, None);
    assert_eq!(cfg.stream.overlay, OverlayMode::Confirmed);
    assert!(cfg.alert.mqtt.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "listen_addr": "0.0.0.0:9100",
        "source": {
            "uri": "/dev/video2",
            "target_fps": 12,
            "width": 800,
            "height": 600
        },
        "model": {
            "backend": "Stub",
            "fall_class_index": 1
        },
        "filter": {
            "persistence_threshold": 3,
            "confidence_minimum": 0.6
        },
        "stream": {
            "duration_seconds": 60,
            "jpeg_quality": 75,
            "overlay": "trigger"
        },
        "alert": {
            "message": "Resident may have fallen",
            "mqtt": { "broker": "mqtt://broker.local:1883" }
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("FALL_PERSISTENCE_THRESHOLD", "7");
    std::env::set_var("SENTINEL_MQTT_TOPIC", "ward-3/falls");

    let cfg = SentinelConfig::load().expect("load config");

    assert_eq!(cfg.listen_addr, "0.0.0.0:9100");
    assert_eq!(cfg.source.uri, "/dev/video2");
    assert_eq!(cfg.source.target_fps, 12);
    assert_eq!(cfg.source.width, 800);
    assert_eq!(cfg.source.height, 600);
    assert_eq!(cfg.model.backend, "stub");
    assert_eq!(cfg.model.fall_class_index, 1);
    assert_eq!(cfg.filter.persistence_threshold, 7);
    assert!((cfg.filter.confidence_minimum - 0.6).abs() < f32::EPSILON);
    assert_eq!(cfg.stream.max_duration, Some(Duration::from_secs(60)));
    assert_eq!(cfg.stream.jpeg_quality, 75);
    assert_eq!(cfg.stream.overlay, OverlayMode::Trigger);
    assert_eq!(cfg.alert.message, "Resident may have fallen");
    let mqtt = cfg.alert.mqtt.expect("mqtt settings");
    assert_eq!(mqtt.broker, "mqtt://broker.local:1883");
    assert_eq!(mqtt.topic, "ward-3/falls");

    clear_env();
}

#[test]
fn toml_config_is_read_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
listen_addr = "127.0.0.1:9200"

[source]
uri = "stub://ward"

[filter]
persistence_threshold = 4
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = SentinelConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.listen_addr, "127.0.0.1:9200");
    assert_eq!(cfg.source.uri, "stub://ward");
    assert_eq!(cfg.filter.persistence_threshold, 4);
}

#[test]
fn unbounded_duration_from_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("STREAM_DURATION_SECONDS", "30");
    let cfg = SentinelConfig::load().expect("load config");
    assert_eq!(cfg.stream.max_duration, Some(Duration::from_secs(30)));

    std::env::set_var("STREAM_DURATION_SECONDS", "unbounded");
    let cfg = SentinelConfig::load().expect("load config");
    assert_eq!(cfg.stream.max_duration, None);

    std::env::set_var("STREAM_DURATION_SECONDS", "0");
    let cfg = SentinelConfig::load().expect("load config");
    assert_eq!(cfg.stream.max_duration, None);

    clear_env();
}

#[test]
fn rejects_out_of_range_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (key, value) in [
        ("FALL_PERSISTENCE_THRESHOLD", "0"),
        ("CONFIDENCE_MINIMUM", "1.5"),
        ("MODEL_INPUT_SIZE", "224"),
        ("FALL_CLASS_INDEX", "2"),
        ("SENTINEL_BACKEND", "tensorflow"),
        ("SENTINEL_JPEG_QUALITY", "0"),
        ("SENTINEL_OVERLAY", "sometimes"),
    ] {
        std::env::set_var(key, value);
        assert!(
            SentinelConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
        std::env::remove_var(key);
    }

    clear_env();
}

#[test]
fn zero_duration_in_file_means_unbounded() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "stream": { "duration_seconds": 0 } }"#)
        .expect("write config");

    let cfg = SentinelConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.stream.max_duration, None);
}

#[test]
fn mqtt_topic_without_broker_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_MQTT_TOPIC", "ward-3/falls");
    let err = SentinelConfig::load().expect_err("topic alone is not a usable MQTT setup");
    assert!(err.to_string().contains("SENTINEL_MQTT_TOPIC"));

    std::env::set_var("SENTINEL_MQTT_BROKER", "broker.local:1883");
    let cfg = SentinelConfig::load().expect("broker and topic");
    assert_eq!(cfg.alert.mqtt.expect("mqtt settings").topic, "ward-3/falls");

    clear_env();
}
