use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AlertStoreConfig;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A detected incident.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct Alert {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    /// Rule id for detector alerts, check name for health alerts
    pub rule_type: String,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Low-severity alerts resolve themselves at this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_resolve_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        subject_id: Option<&str>,
        rule_type: &str,
        severity: Severity,
        details: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at,
            subject_id: subject_id.map(str::to_string),
            rule_type: rule_type.to_string(),
            severity,
            details,
            resolved: false,
            resolved_at: None,
            auto_resolve_at: None,
        }
    }
}

/// Bounded, newest-last collection of alerts.
///
/// Exceeding `hard_cap` drops the oldest entries until `trim_to` remain.
/// Pending auto-resolutions are settled on every access, so a low-severity
/// alert is observed as resolved once its deadline has passed even if nobody
/// called [`AlertStore::resolve`].
pub struct AlertStore {
    config: AlertStoreConfig,
    clock: Arc<dyn Clock>,
    alerts: RwLock<VecDeque<Alert>>,
}

impl AlertStore {
    pub fn new(config: AlertStoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            alerts: RwLock::new(VecDeque::new()),
        }
    }

    /// Create and store an alert stamped with the current time.
    pub async fn raise(
        &self,
        subject_id: Option<&str>,
        rule_type: &str,
        severity: Severity,
        details: serde_json::Value,
    ) -> Alert {
        let alert = Alert::new(subject_id, rule_type, severity, details, self.clock.now());
        self.record(alert).await
    }

    pub async fn record(&self, mut alert: Alert) -> Alert {
        if alert.severity == Severity::Low && alert.auto_resolve_at.is_none() && !alert.resolved {
            alert.auto_resolve_at = Some(alert.created_at + self.config.low_severity_auto_resolve);
        }

        let mut alerts = self.alerts.write().await;
        alerts.push_back(alert.clone());
        if alerts.len() > self.config.hard_cap {
            let excess = alerts.len() - self.config.trim_to;
            alerts.drain(..excess);
            tracing::debug!(dropped = excess, kept = alerts.len(), "alert store trimmed");
        }
        alert
    }

    /// Most recent first.
    pub async fn list(&self, limit: usize) -> Vec<Alert> {
        let now = self.clock.now();
        let mut alerts = self.alerts.write().await;
        settle_auto_resolutions(&mut alerts, now);
        alerts.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<Alert> {
        let now = self.clock.now();
        let mut alerts = self.alerts.write().await;
        settle_auto_resolutions(&mut alerts, now);
        alerts.iter().find(|alert| alert.id == id).cloned()
    }

    /// Returns `false` when no alert with this id is stored.
    pub async fn resolve(&self, id: Uuid) -> bool {
        let now = self.clock.now();
        let mut alerts = self.alerts.write().await;
        match alerts.iter_mut().find(|alert| alert.id == id) {
            Some(alert) => {
                if !alert.resolved {
                    alert.resolved = true;
                    alert.resolved_at = Some(now);
                }
                true
            }
            None => false,
        }
    }

    pub async fn critical_unresolved(&self) -> Vec<Alert> {
        let alerts = self.alerts.read().await;
        alerts
            .iter()
            .rev()
            .filter(|alert| alert.severity == Severity::Critical && !alert.resolved)
            .cloned()
            .collect()
    }

    /// Drop resolved alerts older than the retention window.
    pub async fn purge(&self) -> usize {
        let now = self.clock.now();
        let cutoff = now - self.config.resolved_retention;
        let mut alerts = self.alerts.write().await;
        settle_auto_resolutions(&mut alerts, now);
        let before = alerts.len();
        alerts.retain(|alert| !(alert.resolved && alert.created_at < cutoff));
        before - alerts.len()
    }

    pub async fn len(&self) -> usize {
        self.alerts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.alerts.read().await.is_empty()
    }
}

fn settle_auto_resolutions(alerts: &mut VecDeque<Alert>, now: DateTime<Utc>) {
    for alert in alerts.iter_mut() {
        if let Some(due) = alert.auto_resolve_at
            && !alert.resolved
            && due <= now
        {
            alert.resolved = true;
            alert.resolved_at = Some(due);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AlertStore, Severity};
    use crate::clock::ManualClock;
    use crate::config::AlertStoreConfig;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;

    fn store_with_clock() -> (AlertStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap(),
        ));
        (AlertStore::new(AlertStoreConfig::default(), clock.clone()), clock)
    }

    #[tokio::test]
    async fn list_returns_most_recent_first() {
        let (store, clock) = store_with_clock();
        store.raise(Some("u1"), "first", Severity::Medium, json!({})).await;
        clock.advance(ChronoDuration::seconds(1));
        store.raise(Some("u1"), "second", Severity::Medium, json!({})).await;
        clock.advance(ChronoDuration::seconds(1));
        store.raise(Some("u1"), "third", Severity::Medium, json!({})).await;

        let listed = store.list(2).await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].rule_type, "third");
        assert_eq!(listed[1].rule_type, "second");
    }

    #[tokio::test]
    async fn exceeding_cap_trims_oldest_first_to_floor() {
        let (store, _clock) = store_with_clock();
        for index in 0..1000 {
            store
                .raise(None, &format!("rule_{index}"), Severity::Medium, json!({}))
                .await;
        }
        assert_eq!(store.len().await, 1000);

        store.raise(None, "rule_1000", Severity::Medium, json!({})).await;
        assert_eq!(store.len().await, 500);

        let all = store.list(usize::MAX).await;
        assert_eq!(all.first().unwrap().rule_type, "rule_1000");
        assert_eq!(all.last().unwrap().rule_type, "rule_501");
    }

    #[tokio::test]
    async fn low_severity_resolves_itself_after_an_hour() {
        let (store, clock) = store_with_clock();
        let low = store.raise(Some("u2"), "unusual_hours", Severity::Low, json!({})).await;
        let high = store.raise(Some("u2"), "brute_force", Severity::High, json!({})).await;
        assert!(low.auto_resolve_at.is_some());
        assert!(high.auto_resolve_at.is_none());

        clock.advance(ChronoDuration::minutes(59));
        assert!(!store.get(low.id).await.unwrap().resolved);

        clock.advance(ChronoDuration::minutes(1));
        let settled = store.get(low.id).await.unwrap();
        assert!(settled.resolved);
        assert_eq!(settled.resolved_at, settled.auto_resolve_at);
        assert!(!store.get(high.id).await.unwrap().resolved);
    }

    #[tokio::test]
    async fn resolve_marks_alert_and_reports_unknown_ids() {
        let (store, _clock) = store_with_clock();
        let alert = store.raise(None, "sql_injection", Severity::Critical, json!({})).await;
        assert_eq!(store.critical_unresolved().await.len(), 1);

        assert!(store.resolve(alert.id).await);
        assert!(store.critical_unresolved().await.is_empty());
        assert!(!store.resolve(uuid::Uuid::now_v7()).await);
    }

    #[tokio::test]
    async fn purge_drops_only_old_resolved_alerts() {
        let (store, clock) = store_with_clock();
        let old_resolved = store.raise(None, "a", Severity::High, json!({})).await;
        let old_open = store.raise(None, "b", Severity::High, json!({})).await;
        store.resolve(old_resolved.id).await;

        clock.advance(ChronoDuration::hours(25));
        let fresh = store.raise(None, "c", Severity::High, json!({})).await;
        store.resolve(fresh.id).await;

        assert_eq!(store.purge().await, 1);
        assert!(store.get(old_resolved.id).await.is_none());
        assert!(store.get(old_open.id).await.is_some());
        assert!(store.get(fresh.id).await.is_some());
    }
}
