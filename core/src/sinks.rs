use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alerts::{Alert, Severity};

/// Append-only audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub subject_id: Option<String>,
    pub data: serde_json::Value,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        event_type: &str,
        subject_id: Option<&str>,
        data: serde_json::Value,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            subject_id: subject_id.map(str::to_string),
            data,
            severity,
            timestamp,
        }
    }
}

/// Best-effort audit destination. Implementations must return immediately and
/// swallow their own failures; a decision never waits on the audit trail.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the structured log.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "gatekeep::audit",
            event_type = %event.event_type,
            subject_id = event.subject_id.as_deref().unwrap_or("-"),
            severity = event.severity.as_str(),
            timestamp = %event.timestamp.to_rfc3339(),
            data = %event.data,
            "audit event"
        );
    }
}

/// Keeps audit events in memory; used by tests and local simulations.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|event| event.event_type == event_type)
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

/// External destination for rules whose action is `alert`.
/// Fire-and-forget, same contract as [`AuditSink`].
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert);
}

#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, alert: &Alert) {
        tracing::warn!(
            alert_id = %alert.id,
            rule_type = %alert.rule_type,
            severity = alert.severity.as_str(),
            subject_id = alert.subject_id.as_deref().unwrap_or("-"),
            "security alert notification"
        );
    }
}

#[derive(Debug, Default)]
pub struct MemoryNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryNotifier {
    pub fn delivered(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, alert: &Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(alert.clone());
    }
}
