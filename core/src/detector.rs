use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::alerts::{AlertStore, Severity};
use crate::clock::Clock;
use crate::metrics::MetricsCollector;
use crate::mitigation::MitigationEnforcer;
use crate::rules::{RequestSignals, Rule, RuleAction};
use crate::sinks::{AuditEvent, AuditSink, Notifier};

/// Inbound request metadata handed to [`ThreatDetector::evaluate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SecurityRequest {
    pub subject_id: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Free text supplied by the caller (post body, comment, search query)
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Milliseconds since the subject's previous request
    #[serde(default)]
    pub interval_ms: Option<i64>,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

impl SecurityRequest {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            success: true,
            ..Self::default()
        }
    }

    /// The string content matchers run against.
    pub fn inspected_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(2 + self.headers.len());
        if let Some(user_agent) = self.user_agent.as_deref() {
            parts.push(user_agent);
        }
        if let Some(content) = self.content.as_deref() {
            parts.push(content);
        }
        parts.extend(self.headers.values().map(String::as_str));
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct RuleMatch {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub action: RuleAction,
    pub alert_id: Uuid,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct Evaluation {
    pub admitted: bool,
    /// The subject was already blocked; rules were not evaluated
    pub already_blocked: bool,
    pub matched: Vec<RuleMatch>,
}

pub struct DetectorSettings {
    pub timezone: Tz,
    pub block_ttl: ChronoDuration,
}

/// Evaluates requests against the rule set and applies the mitigation each
/// matching rule names.
pub struct ThreatDetector {
    rules: Vec<Rule>,
    settings: DetectorSettings,
    alerts: Arc<AlertStore>,
    enforcer: Arc<MitigationEnforcer>,
    metrics: Arc<MetricsCollector>,
    admission: Arc<AdmissionController>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl ThreatDetector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rules: Vec<Rule>,
        settings: DetectorSettings,
        alerts: Arc<AlertStore>,
        enforcer: Arc<MitigationEnforcer>,
        metrics: Arc<MetricsCollector>,
        admission: Arc<AdmissionController>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            settings,
            alerts,
            enforcer,
            metrics,
            admission,
            notifier,
            audit,
            clock,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub async fn evaluate(&self, request: &SecurityRequest) -> Evaluation {
        let subject_id = request.subject_id.as_str();

        if self.enforcer.is_blocked(subject_id) {
            self.metrics.record_blocked().await;
            self.metrics.record_request(request.success).await;
            tracing::info!(subject_id = subject_id, "request from blocked subject rejected");
            return Evaluation {
                admitted: false,
                already_blocked: true,
                matched: Vec::new(),
            };
        }

        let now = self.clock.now();
        let signals = RequestSignals {
            content: request.inspected_text(),
            consecutive_failures: request.consecutive_failures,
            interval_ms: request.interval_ms,
            rate_limit_violations: self.admission.violations_for(subject_id).await,
            local_hour: now.with_timezone(&self.settings.timezone).hour(),
        };

        let mut admitted = true;
        let mut matched = Vec::new();
        for rule in self.rules.iter().filter(|rule| rule.matches(&signals)) {
            self.metrics.record_suspicious().await;
            let alert = self
                .alerts
                .raise(
                    Some(subject_id),
                    &rule.id,
                    rule.severity,
                    json!({
                        "rule_name": rule.name,
                        "action": rule.action.as_str(),
                        "user_agent": request.user_agent,
                        "consecutive_failures": request.consecutive_failures,
                        "interval_ms": request.interval_ms,
                        "rate_limit_violations": signals.rate_limit_violations,
                    }),
                )
                .await;

            tracing::warn!(
                subject_id = subject_id,
                rule_id = %rule.id,
                severity = rule.severity.as_str(),
                action = rule.action.as_str(),
                alert_id = %alert.id,
                "security rule matched"
            );
            self.audit.record(AuditEvent::new(
                "security_rule_matched",
                Some(subject_id),
                json!({ "rule_id": rule.id, "action": rule.action.as_str(), "alert_id": alert.id }),
                rule.severity,
                now,
            ));

            match rule.action {
                RuleAction::Log => {}
                RuleAction::Block => {
                    self.enforcer.block(subject_id, &rule.id, self.settings.block_ttl);
                    self.metrics.record_blocked().await;
                    admitted = false;
                }
                RuleAction::Throttle => {
                    self.enforcer.throttle(subject_id, &rule.id).await;
                }
                RuleAction::Alert => self.notifier.notify(&alert),
            }

            matched.push(RuleMatch {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                severity: rule.severity,
                action: rule.action,
                alert_id: alert.id,
            });
        }

        self.metrics.record_request(request.success).await;
        Evaluation {
            admitted,
            already_blocked: false,
            matched,
        }
    }
}
