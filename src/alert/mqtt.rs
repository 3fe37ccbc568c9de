//! MQTT alert sink.
//!
//! Publishes each alert as JSON with QoS 0 (at most once). Publishing uses
//! `try_publish`, so a stalled broker connection drops alerts instead of
//! stalling the stream.

use anyhow::{anyhow, Context, Result};
use rumqttc::{Client, Connection, Event, MqttOptions, QoS};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{AlertSink, FallAlert};
use crate::config::MqttSettings;

const DEFAULT_MQTT_PORT: u16 = 1883;

pub struct MqttSink {
    client: Client,
    topic: String,
}

impl MqttSink {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let (host, port) = parse_broker(&settings.broker)?;
        let mut options = MqttOptions::new(&settings.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_session(true);

        let (client, connection) = Client::new(options, 10);
        // The event loop thread exits on its own once the connection drops.
        spawn_event_loop(connection);
        log::info!(
            "MqttSink: publishing alerts to {} on {}",
            settings.topic,
            settings.broker
        );
        Ok(Self {
            client,
            topic: settings.topic.clone(),
        })
    }
}

fn spawn_event_loop(mut connection: Connection) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    break;
                }
            }
        }
    })
}

impl AlertSink for MqttSink {
    fn notify(&mut self, alert: &FallAlert) {
        let payload = alert.to_json().into_bytes();
        if let Err(e) = self
            .client
            .try_publish(self.topic.as_str(), QoS::AtMostOnce, false, payload)
        {
            log::warn!("MQTT alert publish failed: {}", e);
        }
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        let _ = self.client.try_disconnect();
    }
}

fn parse_broker(broker: &str) -> Result<(String, u16)> {
    let trimmed = broker.trim();
    let without_scheme = trimmed.strip_prefix("mqtt://").unwrap_or(trimmed);
    if without_scheme.is_empty() {
        return Err(anyhow!("MQTT broker address is empty"));
    }
    match without_scheme.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("invalid MQTT broker port in '{}'", broker))?;
            Ok((host.to_string(), port))
        }
        None => Ok((without_scheme.to_string(), DEFAULT_MQTT_PORT)),
    }
}
