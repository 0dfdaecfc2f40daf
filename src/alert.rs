//! Outbound intrusion alerts.
//!
//! Delivery is fire-and-forget: a fresh connection per alert, a short
//! timeout, and failures logged rather than surfaced. The sink sits
//! behind a trait so the transport can be swapped (e.g. for a durable
//! queue) without touching the dispatcher's cooldown logic.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ALERT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// The JSON record handed to the notification service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertMessage {
    #[serde(rename = "type")]
    pub kind: String,
    /// ISO-8601 UTC timestamp of the firing frame.
    pub timestamp: String,
    pub persons: u32,
    pub duration_sec: f64,
}

impl AlertMessage {
    pub fn intrusion(now: DateTime<Utc>, persons: u32, duration: Duration) -> Self {
        Self {
            kind: "intrusion".to_string(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            persons,
            duration_sec: duration.as_secs_f64(),
        }
    }
}

/// Opaque "send alert message" sink. No delivery guarantee is required
/// of implementations.
pub trait AlertSink: Send + Sync {
    fn send(&self, msg: &AlertMessage) -> Result<()>;
}

/// POSTs the alert JSON to a notifier endpoint.
pub struct HttpAlertSink {
    url: String,
    agent: ureq::Agent,
}

impl HttpAlertSink {
    pub fn new(url: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(ALERT_SEND_TIMEOUT)
            .timeout(ALERT_SEND_TIMEOUT)
            .build();
        Self { url, agent }
    }
}

impl AlertSink for HttpAlertSink {
    fn send(&self, msg: &AlertMessage) -> Result<()> {
        self.agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&serde_json::to_string(msg)?)
            .with_context(|| format!("post alert to {}", self.url))?;
        Ok(())
    }
}

/// Sink used when no notifier is configured. Alerts are only logged.
pub struct NullAlertSink;

impl AlertSink for NullAlertSink {
    fn send(&self, msg: &AlertMessage) -> Result<()> {
        log::info!(
            "alert (no sink configured): persons={} duration={:.1}s",
            msg.persons,
            msg.duration_sec
        );
        Ok(())
    }
}
