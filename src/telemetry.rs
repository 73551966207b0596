//! Security telemetry.
//!
//! The client side reports hydration anomalies through a [`SecurityReporter`]
//! and never waits on delivery. The server side accepts those reports with
//! [`SecurityEventHandler`], which validates the payload, fills defaults and
//! passes the record to an [`EventSink`]. Neither direction can fail its
//! caller.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::BoxError;

/// Endpoint the client posts security events to.
pub const SECURITY_EVENT_URL: &str = "/api/client-security-event";

/// RFC 3339 timestamp in UTC with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Event taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// The inline manifest does not match its advertised digest.
    ManifestIntegrityFailed,
    /// The digest could not be checked at all.
    ManifestIntegrityError,
    IslandsNotFound,
    IslandModuleMissing,
    IslandImportFailed,
    IslandMountFailed,
    IslandDefaultExportMissing,
}

impl SecurityEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEventKind::ManifestIntegrityFailed => "manifest_integrity_failed",
            SecurityEventKind::ManifestIntegrityError => "manifest_integrity_error",
            SecurityEventKind::IslandsNotFound => "islands_not_found",
            SecurityEventKind::IslandModuleMissing => "island_module_missing",
            SecurityEventKind::IslandImportFailed => "island_import_failed",
            SecurityEventKind::IslandMountFailed => "island_mount_failed",
            SecurityEventKind::IslandDefaultExportMissing => "island_default_export_missing",
        }
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload the client sends to [`SECURITY_EVENT_URL`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event: String,
    pub detail: Map<String, Value>,
    pub path: String,
    pub timestamp: String,
}

impl SecurityEvent {
    pub fn new(
        kind: SecurityEventKind,
        detail: Map<String, Value>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            event: kind.as_str().to_string(),
            detail,
            path: path.into(),
            timestamp: now_rfc3339(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client-side reporters
// ---------------------------------------------------------------------------

/// Fire-and-forget delivery of client security events.
pub trait SecurityReporter: Send + Sync {
    fn report(&self, event: SecurityEvent);
}

/// Logs events through `tracing`. The default reporter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl SecurityReporter for TracingReporter {
    fn report(&self, event: SecurityEvent) {
        let detail = Value::Object(event.detail);
        warn!(
            event = %event.event,
            path = %event.path,
            detail = %detail,
            "client-security-event"
        );
    }
}

/// Hands events to a background delivery task over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<SecurityEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SecurityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SecurityReporter for ChannelReporter {
    fn report(&self, event: SecurityEvent) {
        if self.tx.send(event).is_err() {
            debug!("Security event dropped: delivery task is gone");
        }
    }
}

// ---------------------------------------------------------------------------
// Server-side handler
// ---------------------------------------------------------------------------

/// An incoming POST to the telemetry endpoint.
#[derive(Debug, Clone, Default)]
pub struct TelemetryRequest<'a> {
    pub body: &'a [u8],
    /// Request path, used when the payload carries none.
    pub path: &'a str,
    pub ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryResponse {
    pub status: u16,
    /// JSON body; empty for `204`.
    pub body: String,
}

impl TelemetryResponse {
    fn no_content() -> Self {
        Self {
            status: 204,
            body: String::new(),
        }
    }

    fn bad_request() -> Self {
        Self {
            status: 400,
            body: json!({ "ok": false }).to_string(),
        }
    }
}

/// A validated event with request metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    pub event: String,
    pub detail: Value,
    pub path: String,
    pub timestamp: String,
    pub ip: Option<String>,
    pub user_agent: String,
}

/// Where accepted events go.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &RecordedEvent) -> Result<(), BoxError>;
}

/// Logs accepted events at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &RecordedEvent) -> Result<(), BoxError> {
        warn!(
            event = %event.event,
            path = %event.path,
            timestamp = %event.timestamp,
            ip = event.ip.as_deref().unwrap_or("-"),
            user_agent = %event.user_agent,
            detail = %event.detail,
            "client-security-event"
        );
        Ok(())
    }
}

type EventHook = Arc<dyn Fn(&RecordedEvent) + Send + Sync>;

/// Accepts client security reports.
#[derive(Clone)]
pub struct SecurityEventHandler {
    sink: Arc<dyn EventSink>,
    on_event: Option<EventHook>,
}

impl Default for SecurityEventHandler {
    fn default() -> Self {
        Self::new(TracingSink)
    }
}

impl SecurityEventHandler {
    pub fn new(sink: impl EventSink + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
            on_event: None,
        }
    }

    pub fn on_event(mut self, hook: impl Fn(&RecordedEvent) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(hook));
        self
    }

    /// Validate and record one report.
    ///
    /// `400 {"ok":false}` unless the body is a JSON object whose `event` is a
    /// non-empty string. Everything after validation is best-effort.
    pub fn handle(&self, request: &TelemetryRequest<'_>) -> TelemetryResponse {
        let Some(record) = parse_event(request) else {
            return TelemetryResponse::bad_request();
        };

        match catch_unwind(AssertUnwindSafe(|| self.sink.record(&record))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "Security event sink failed"),
            Err(_) => debug!("Security event sink panicked"),
        }

        if let Some(hook) = &self.on_event {
            if catch_unwind(AssertUnwindSafe(|| hook(&record))).is_err() {
                debug!("Security event hook panicked");
            }
        }

        TelemetryResponse::no_content()
    }
}

fn parse_event(request: &TelemetryRequest<'_>) -> Option<RecordedEvent> {
    let Ok(Value::Object(mut body)) = serde_json::from_slice::<Value>(request.body) else {
        return None;
    };

    let event = match body.remove("event") {
        Some(Value::String(event)) if !event.is_empty() => event,
        _ => return None,
    };

    let detail = body
        .remove("detail")
        .filter(is_truthy)
        .unwrap_or_else(|| Value::Object(Map::new()));

    Some(RecordedEvent {
        event,
        detail,
        path: non_empty_string(body.remove("path")).unwrap_or_else(|| request.path.to_string()),
        timestamp: non_empty_string(body.remove("timestamp")).unwrap_or_else(now_rfc3339),
        ip: request.ip.map(str::to_string),
        user_agent: request.user_agent.unwrap_or_default().to_string(),
    })
}

fn non_empty_string(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemorySink(Mutex<Vec<RecordedEvent>>);

    impl EventSink for Arc<MemorySink> {
        fn record(&self, event: &RecordedEvent) -> Result<(), BoxError> {
            self.0.lock().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn record(&self, _event: &RecordedEvent) -> Result<(), BoxError> {
            Err("disk full".into())
        }
    }

    fn request(body: &str) -> TelemetryRequest<'_> {
        TelemetryRequest {
            body: body.as_bytes(),
            path: "/api/client-security-event",
            ip: Some("10.0.0.1"),
            user_agent: Some("test-agent"),
        }
    }

    #[test]
    fn event_names() {
        assert_eq!(
            SecurityEventKind::IslandMountFailed.as_str(),
            "island_mount_failed"
        );
        assert_eq!(
            serde_json::to_value(SecurityEventKind::ManifestIntegrityFailed).unwrap(),
            "manifest_integrity_failed"
        );
    }

    #[test]
    fn accepted_event_gets_defaults() {
        let sink = Arc::new(MemorySink::default());
        let handler = SecurityEventHandler::new(sink.clone());

        let response = handler.handle(&request(r#"{"event":"x"}"#));
        assert_eq!(response.status, 204);
        assert!(response.body.is_empty());

        let recorded = sink.0.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].event, "x");
        assert_eq!(recorded[0].detail, json!({}));
        assert_eq!(recorded[0].path, "/api/client-security-event");
        assert_eq!(recorded[0].ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(recorded[0].user_agent, "test-agent");
        assert!(chrono::DateTime::parse_from_rfc3339(&recorded[0].timestamp).is_ok());
    }

    #[test]
    fn payload_fields_win_over_defaults() {
        let sink = Arc::new(MemorySink::default());
        let handler = SecurityEventHandler::new(sink.clone());
        handler.handle(&request(
            r#"{"event":"island_mount_failed","detail":{"moduleKey":"cart"},"path":"/cart","timestamp":"2024-01-01T00:00:00.000Z"}"#,
        ));

        let recorded = sink.0.lock();
        assert_eq!(recorded[0].detail, json!({"moduleKey": "cart"}));
        assert_eq!(recorded[0].path, "/cart");
        assert_eq!(recorded[0].timestamp, "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn invalid_payloads_are_rejected() {
        let handler = SecurityEventHandler::default();
        for body in ["{}", r#"{"event":""}"#, r#"{"event":7}"#, "[]", "not json", ""] {
            let response = handler.handle(&request(body));
            assert_eq!(response.status, 400, "body {body:?}");
            assert_eq!(response.body, r#"{"ok":false}"#);
        }
    }

    #[test]
    fn sink_and_hook_failures_are_isolated() {
        let handler = SecurityEventHandler::new(FailingSink).on_event(|_| panic!("hook blew up"));
        let response = handler.handle(&request(r#"{"event":"x"}"#));
        assert_eq!(response.status, 204);
    }

    #[test]
    fn tracing_reporter_logs_detail() {
        let mut detail = Map::new();
        detail.insert("moduleSpecifier".into(), json!("cart"));
        TracingReporter.report(SecurityEvent::new(
            SecurityEventKind::IslandModuleMissing,
            detail,
            "/cart",
        ));
    }

    #[tokio::test]
    async fn channel_reporter_delivers() {
        let (reporter, mut rx) = ChannelReporter::new();
        reporter.report(SecurityEvent::new(
            SecurityEventKind::IslandsNotFound,
            Map::new(),
            "/",
        ));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, "islands_not_found");

        drop(rx);
        // Closed channel is not an error for the caller.
        reporter.report(SecurityEvent::new(
            SecurityEventKind::IslandsNotFound,
            Map::new(),
            "/",
        ));
    }
}
