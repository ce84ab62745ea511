use gatekeep_core::{Alert, AuditEvent, AuditSink, Notifier};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Audit events buffered ahead of the database writer.
pub const AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Appends audit events to `security_audit_events`.
///
/// Events go through a bounded queue drained by one writer task. When the
/// queue is full the event is logged and dropped.
#[derive(Clone)]
pub struct PgAuditSink {
    queue: mpsc::Sender<AuditEvent>,
}

impl PgAuditSink {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(pool: sqlx::PgPool, capacity: usize) -> Self {
        let (queue, events) = mpsc::channel(capacity.max(1));
        tokio::spawn(write_events(pool, events));
        Self { queue }
    }
}

async fn write_events(pool: sqlx::PgPool, mut events: mpsc::Receiver<AuditEvent>) {
    while let Some(event) = events.recv().await {
        if let Err(err) = sqlx::query(
            r#"
            INSERT INTO security_audit_events (
                event_type,
                subject_id,
                data,
                severity,
                occurred_at
            ) VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&event.event_type)
        .bind(event.subject_id.as_deref())
        .bind(&event.data)
        .bind(event.severity.as_str())
        .bind(event.timestamp)
        .execute(&pool)
        .await
        {
            tracing::warn!(
                error = %err,
                event_type = %event.event_type,
                "failed to persist security audit event"
            );
        }
    }
    tracing::debug!("audit writer stopped");
}

impl AuditSink for PgAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.queue.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => tracing::warn!(
                event_type = %event.event_type,
                "audit queue full; event dropped"
            ),
            Err(TrySendError::Closed(event)) => tracing::warn!(
                event_type = %event.event_type,
                "audit writer stopped; event dropped"
            ),
        }
    }
}

/// POSTs alerts raised by `alert`-action rules to a webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, alert: &Alert) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(alert_id = %alert.id, "no runtime; alert notification dropped");
            return;
        };
        let request = self.client.post(&self.url).json(alert);
        let alert_id = alert.id;
        runtime.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(alert_id = %alert_id, "alert notification delivered");
                }
                Ok(resp) => tracing::warn!(
                    alert_id = %alert_id,
                    status = resp.status().as_u16(),
                    "alert webhook rejected notification"
                ),
                Err(err) => tracing::warn!(
                    error = %err,
                    alert_id = %alert_id,
                    "failed to deliver alert notification"
                ),
            }
        });
    }
}
