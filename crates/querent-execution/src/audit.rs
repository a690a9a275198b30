//! Query audit trail.
//!
//! Every query attempt is logged as one `tracing` event on [`AUDIT_TARGET`].
//! [`AuditEventLayer`] picks those events out of the subscriber and forwards
//! them over a tokio channel, so a CLI or a test can watch them live.

use querent_core::security::RejectionRule;
use querent_core::session::FragmentKind;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// `tracing` target reserved for audit events.
pub const AUDIT_TARGET: &str = "querent::audit";

// ============================================================================
// Audit record
// ============================================================================

/// One query attempt, accepted or rejected.
#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    pub session_id: &'a str,
    /// 1-based; regenerations after a rejection increment it. 0 marks a
    /// question rejected before any fragment was requested.
    pub attempt: usize,
    pub fragment_kind: Option<FragmentKind>,
    pub fragment: Option<&'a str>,
    pub allowed: bool,
    pub rule: Option<RejectionRule>,
    pub elapsed_ms: u64,
    /// `"ok"` or a `QueryError::kind()` name.
    pub outcome: &'a str,
}

impl AuditRecord<'_> {
    /// Emits the record as an `INFO` event on [`AUDIT_TARGET`].
    pub fn emit(&self) {
        let fragment_kind = self
            .fragment_kind
            .map(|kind| kind.to_string())
            .unwrap_or_default();
        let rule = self.rule.map(|rule| rule.to_string()).unwrap_or_default();
        let attempt = self.attempt as u64;
        let fragment = self.fragment.unwrap_or("");

        tracing::info!(
            target: AUDIT_TARGET,
            session_id = self.session_id,
            attempt,
            fragment_kind = fragment_kind.as_str(),
            fragment,
            allowed = self.allowed,
            rule = rule.as_str(),
            elapsed_ms = self.elapsed_ms,
            outcome = self.outcome,
            "query attempt"
        );
    }
}

// ============================================================================
// Layer
// ============================================================================

/// An audit event as seen by a channel consumer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEvent {
    pub level: String,
    pub message: String,
    /// Structured fields of the event, `message` excluded.
    pub fields: HashMap<String, Value>,
    pub timestamp: String,
}

impl AuditEvent {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn field_bool(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(Value::as_bool)
    }

    pub fn field_u64(&self, name: &str) -> Option<u64> {
        self.fields.get(name).and_then(Value::as_u64)
    }
}

/// A tracing layer that forwards [`AUDIT_TARGET`] events to a channel.
pub struct AuditEventLayer {
    sender: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditEventLayer {
    pub fn new(sender: mpsc::UnboundedSender<AuditEvent>) -> Self {
        Self { sender }
    }

    /// Creates a layer together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl<S> Layer<S> for AuditEventLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != AUDIT_TARGET {
            return;
        }

        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));
        let message = match fields.remove("message") {
            Some(Value::String(message)) => message,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let audit_event = AuditEvent {
            level: event.metadata().level().to_string(),
            message,
            fields,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        // A dropped receiver only means nobody is watching.
        let _ = self.sender.send(audit_event);
    }
}

/// Collects event fields into JSON values.
struct FieldVisitor<'a>(&'a mut HashMap<String, Value>);

impl tracing::field::Visit for FieldVisitor<'_> {
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(format!("{value:?}")));
    }
}
