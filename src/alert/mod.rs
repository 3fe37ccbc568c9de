//! Alert delivery.
//!
//! The pipeline calls an [`AlertSink`] once per confirmed fall episode and
//! moves on. Sinks never report back: delivery is best-effort, at most once.

mod hub;
#[cfg(feature = "alert-mqtt")]
pub mod mqtt;

pub use hub::{AlertHub, AlertSubscription};
#[cfg(feature = "alert-mqtt")]
pub use mqtt::MqttSink;

use serde::{Deserialize, Serialize};
use std::io::Write;

pub const FALL_ALERT_EVENT: &str = "fall_alert";
pub const DEFAULT_ALERT_MESSAGE: &str = "Fall detected!";

/// Wire shape: `{"event": "fall_alert", "payload": {"message": "..."}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallAlert {
    pub event: String,
    pub payload: AlertPayload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub message: String,
}

impl FallAlert {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            event: FALL_ALERT_EVENT.to_string(),
            payload: AlertPayload {
                message: message.into(),
            },
        }
    }

    pub fn to_json(&self) -> String {
        // Two plain string fields; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Default for FallAlert {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_MESSAGE)
    }
}

/// Fire-and-forget alert destination.
pub trait AlertSink: Send {
    /// Deliver one alert. Must not block on the receiver.
    fn notify(&mut self, alert: &FallAlert);
}

impl<S: AlertSink + ?Sized> AlertSink for Box<S> {
    fn notify(&mut self, alert: &FallAlert) {
        (**self).notify(alert)
    }
}

/// Writes alerts to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn notify(&mut self, alert: &FallAlert) {
        log::warn!("{}: {}", alert.event, alert.payload.message);
    }
}

/// Writes each alert as one JSON line, e.g. to stdout for offline runs.
pub struct JsonLinesSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> AlertSink for JsonLinesSink<W> {
    fn notify(&mut self, alert: &FallAlert) {
        if let Err(err) = writeln!(self.out, "{}", alert.to_json()).and_then(|_| self.out.flush()) {
            log::warn!("alert line not written: {}", err);
        }
    }
}

/// Forwards each alert to every inner sink, in order.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: AlertSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for MultiSink {
    fn notify(&mut self, alert: &FallAlert) {
        for sink in &mut self.sinks {
            sink.notify(alert);
        }
    }
}
