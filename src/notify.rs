// src/notify.rs
//
// Notification sink (spec.md §4.15). One call fans out to every configured
// transport with a short per-transport timeout; failures are logged and
// swallowed here, never propagated to the pipeline (spec.md §7) — the same
// "best effort, log and move on" shape the teacher uses for its own
// best-effort output sinks.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub event: String,
    pub severity: Severity,
    pub fields: serde_json::Value,
}

impl NotificationEvent {
    pub fn new(event: impl Into<String>, severity: Severity, fields: serde_json::Value) -> Self {
        Self { event: event.into(), severity, fields }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("transport {transport} failed: {reason}")]
    TransportFailed { transport: &'static str, reason: String },
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, event: &NotificationEvent) -> Result<(), NotificationError>;
}

/// Posts the event as JSON to a webhook URL. The URL is masked before it
/// ever reaches a log line (`mask_url`), since it commonly carries a secret
/// token in its path or query string.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        let response = self.client.post(&self.url).json(event).send().await.map_err(|e| {
            NotificationError::TransportFailed { transport: "webhook", reason: e.to_string() }
        })?;
        if !response.status().is_success() {
            return Err(NotificationError::TransportFailed {
                transport: "webhook",
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Logs the event instead of delivering it anywhere; the default transport
/// when no webhook is configured, and the only transport used in tests.
pub struct LoggedTransport;

#[async_trait]
impl Transport for LoggedTransport {
    fn name(&self) -> &'static str {
        "logged"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        info!(event = %event.event, severity = ?event.severity, fields = %event.fields, "notification");
        Ok(())
    }
}

pub struct NotificationSink {
    transports: Vec<Box<dyn Transport>>,
}

impl NotificationSink {
    pub fn new(transports: Vec<Box<dyn Transport>>) -> Self {
        Self { transports }
    }

    pub async fn notify(&self, event: NotificationEvent) {
        for transport in &self.transports {
            match tokio::time::timeout(TRANSPORT_TIMEOUT, transport.send(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(transport = transport.name(), error = %e, "notification transport failed"),
                Err(_) => warn!(transport = transport.name(), "notification transport timed out"),
            }
        }
    }
}

/// Masks path segments and query values that look like opaque tokens
/// (longer than 8 chars, alphanumeric/`-`/`_` only) so a webhook secret
/// never lands verbatim in a log line.
pub fn mask_url(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return "***".to_string();
    };

    let masked_path: Vec<String> =
        parsed.path_segments().map(|segments| segments.map(mask_token).collect()).unwrap_or_default();
    parsed.set_path(&masked_path.join("/"));

    let masked_query: Vec<(String, String)> =
        parsed.query_pairs().map(|(k, v)| (k.to_string(), mask_token(&v))).collect();
    if !masked_query.is_empty() {
        parsed.query_pairs_mut().clear().extend_pairs(&masked_query);
    }

    parsed.to_string()
}

fn mask_token(segment: &str) -> String {
    let looks_like_token =
        segment.len() > 8 && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if looks_like_token {
        format!("{}…", &segment[..4])
    } else {
        segment.to_string()
    }
}
