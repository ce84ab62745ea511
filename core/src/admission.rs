use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};

use crate::alerts::Severity;
use crate::clock::Clock;
use crate::config::{ActionConfig, FallbackConfig};
use crate::error::GatekeepError;
use crate::sinks::{AuditEvent, AuditSink};

const INTERVAL_SAMPLE_SIZE: usize = 10;
const MIN_REQUESTS_FOR_SUCCESS_RATE: u64 = 10;
const HIGH_SUCCESS_RATE: f64 = 0.95;
const LOW_SUCCESS_RATE: f64 = 0.7;
const BURST_INTERVAL_MS: f64 = 1000.0;
const SUSPICION_PENALTY: f64 = 0.3;
const SUSPICION_FLOOR: f64 = 0.1;
const IDLE_RECORD_TTL_MINUTES: i64 = 60;

/// Behavioral signals tracked per (subject, action).
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct Behavior {
    pub success_rate: f64,
    /// Mean of the most recent gaps between admitted requests, absent until
    /// two requests have been admitted inside the window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_interval_ms: Option<f64>,
    pub total_requests: u64,
    pub suspicious_activity: u32,
    pub account_age_days: f64,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            average_interval_ms: None,
            total_requests: 0,
            suspicious_activity: 0,
            account_age_days: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuotaRecord {
    pub timestamps: VecDeque<DateTime<Utc>>,
    pub violations: u32,
    pub last_violation: Option<DateTime<Utc>>,
    pub adapted_limit: u32,
    pub behavior: Behavior,
    last_seen: DateTime<Utc>,
}

impl QuotaRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            timestamps: VecDeque::new(),
            violations: 0,
            last_violation: None,
            adapted_limit: 1,
            behavior: Behavior::default(),
            last_seen: now,
        }
    }

    fn prune(&mut self, window_start: DateTime<Utc>) {
        while self
            .timestamps
            .front()
            .is_some_and(|admitted| *admitted <= window_start)
        {
            self.timestamps.pop_front();
        }
    }

    fn snapshot(&self) -> BehaviorSnapshot {
        BehaviorSnapshot {
            behavior: self.behavior.clone(),
            violations: self.violations,
            last_violation: self.last_violation,
            adapted_limit: self.adapted_limit,
            requests_in_window: self.timestamps.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct BehaviorSnapshot {
    pub behavior: Behavior,
    pub violations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_violation: Option<DateTime<Utc>>,
    pub adapted_limit: u32,
    pub requests_in_window: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionAlgorithm {
    Adaptive,
    FixedWindow,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub algorithm: AdmissionAlgorithm,
    pub limit: u32,
    pub remaining: u32,
    /// Milliseconds until the oldest counted request leaves the window; 0 when allowed
    pub retry_after_ms: i64,
}

/// Multiplier applied to `base_limit` from the behavioral tiers.
pub fn behavior_multiplier(behavior: &Behavior) -> f64 {
    let mut multiplier = 1.0;

    let age = behavior.account_age_days;
    multiplier *= if age < 1.0 {
        0.3
    } else if age < 7.0 {
        0.6
    } else if age < 30.0 {
        0.8
    } else {
        1.0
    };

    // Too few outcomes say nothing about the subject yet.
    if behavior.total_requests >= MIN_REQUESTS_FOR_SUCCESS_RATE {
        if behavior.success_rate > HIGH_SUCCESS_RATE {
            multiplier *= 1.2;
        } else if behavior.success_rate < LOW_SUCCESS_RATE {
            multiplier *= 0.5;
        }
    }

    if behavior.suspicious_activity > 0 {
        multiplier *= (1.0 - behavior.suspicious_activity as f64 * SUSPICION_PENALTY)
            .max(SUSPICION_FLOOR);
    }

    if behavior
        .average_interval_ms
        .is_some_and(|interval| interval < BURST_INTERVAL_MS)
    {
        multiplier *= 0.3;
    }

    multiplier
}

/// Effective quota for a behavior snapshot. Never below 1.
pub fn adapted_limit(config: &ActionConfig, behavior: &Behavior) -> u32 {
    // The epsilon keeps products like 10 x 0.7 from flooring to 6.
    let raw = (config.base_limit as f64 * behavior_multiplier(behavior) + 1e-9).floor();
    if raw.is_finite() && raw >= 1.0 {
        raw.min(u32::MAX as f64) as u32
    } else {
        1
    }
}

fn average_recent_interval_ms(timestamps: &VecDeque<DateTime<Utc>>) -> Option<f64> {
    if timestamps.len() < 2 {
        return None;
    }
    let skip = timestamps.len().saturating_sub(INTERVAL_SAMPLE_SIZE + 1);
    let recent: Vec<&DateTime<Utc>> = timestamps.iter().skip(skip).collect();
    let gaps: Vec<f64> = recent
        .windows(2)
        .map(|pair| (*pair[1] - *pair[0]).num_milliseconds().max(0) as f64)
        .collect();
    Some(gaps.iter().sum::<f64>() / gaps.len() as f64)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuotaKey {
    subject_id: String,
    action: String,
}

impl QuotaKey {
    fn new(subject_id: &str, action: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            action: action.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct FixedWindowCounter {
    window_start: DateTime<Utc>,
    count: u32,
}

/// Per-subject, per-action adaptive quota.
///
/// Each (subject, action) record lives behind its own mutex, so the
/// check-then-append step is atomic per key while unrelated keys proceed in
/// parallel. Actions without a registered [`ActionConfig`] fall back to a
/// plain fixed-window counter.
pub struct AdmissionController {
    configs: RwLock<HashMap<String, ActionConfig>>,
    records: RwLock<HashMap<QuotaKey, Arc<Mutex<QuotaRecord>>>>,
    fallback: FallbackConfig,
    fallback_counters: Mutex<HashMap<QuotaKey, FixedWindowCounter>>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl AdmissionController {
    pub fn new(fallback: FallbackConfig, clock: Arc<dyn Clock>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            fallback,
            fallback_counters: Mutex::new(HashMap::new()),
            clock,
            audit,
        }
    }

    pub async fn configure(&self, action: &str, config: ActionConfig) -> Result<(), GatekeepError> {
        config.validate(action)?;
        tracing::debug!(
            action = action,
            base_limit = config.base_limit,
            window_secs = config.time_window.num_seconds(),
            "admission action configured"
        );
        self.configs.write().await.insert(action.to_string(), config);
        Ok(())
    }

    pub async fn action_config(&self, action: &str) -> Option<ActionConfig> {
        self.configs.read().await.get(action).cloned()
    }

    pub async fn actions(&self) -> Vec<(String, ActionConfig)> {
        let mut actions: Vec<(String, ActionConfig)> = self
            .configs
            .read()
            .await
            .iter()
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect();
        actions.sort_by(|a, b| a.0.cmp(&b.0));
        actions
    }

    pub async fn admit(
        &self,
        subject_id: &str,
        action: &str,
        account_age_days: f64,
        was_success: bool,
    ) -> bool {
        self.check(subject_id, action, account_age_days, was_success)
            .await
            .allowed
    }

    pub async fn check(
        &self,
        subject_id: &str,
        action: &str,
        account_age_days: f64,
        was_success: bool,
    ) -> AdmissionDecision {
        let now = self.clock.now();
        let Some(config) = self.action_config(action).await else {
            return self.check_fixed_window(subject_id, action, now).await;
        };

        let entry = self.entry(subject_id, action, now).await;
        let mut record = entry.lock().await;

        record.prune(now - config.time_window);
        record.last_seen = now;

        let behavior = &mut record.behavior;
        behavior.total_requests += 1;
        let outcome = if was_success { 1.0 } else { 0.0 };
        behavior.success_rate +=
            (outcome - behavior.success_rate) / behavior.total_requests as f64;
        behavior.account_age_days = if account_age_days.is_finite() {
            account_age_days.max(0.0)
        } else {
            0.0
        };
        let interval = average_recent_interval_ms(&record.timestamps);
        record.behavior.average_interval_ms = interval;

        let limit = adapted_limit(&config, &record.behavior);
        record.adapted_limit = limit;

        let in_window = record.timestamps.len() as u32;
        if in_window >= limit {
            record.violations += 1;
            record.last_violation = Some(now);
            record.behavior.suspicious_activity += 1;

            let retry_after_ms = record
                .timestamps
                .front()
                .map(|oldest| (*oldest + config.time_window - now).num_milliseconds().max(1))
                .unwrap_or(1);

            tracing::warn!(
                subject_id = subject_id,
                action = action,
                adapted_limit = limit,
                requests_in_window = in_window,
                violations = record.violations,
                "admission denied: adaptive quota exhausted"
            );
            self.audit.record(AuditEvent::new(
                "rate_limit_exceeded",
                Some(subject_id),
                json!({
                    "action": action,
                    "adapted_limit": limit,
                    "requests_in_window": in_window,
                    "violations": record.violations,
                    "behavior": record.behavior,
                }),
                Severity::Medium,
                now,
            ));

            return AdmissionDecision {
                allowed: false,
                algorithm: AdmissionAlgorithm::Adaptive,
                limit,
                remaining: 0,
                retry_after_ms,
            };
        }

        record.timestamps.push_back(now);
        AdmissionDecision {
            allowed: true,
            algorithm: AdmissionAlgorithm::Adaptive,
            limit,
            remaining: limit - in_window - 1,
            retry_after_ms: 0,
        }
    }

    async fn check_fixed_window(
        &self,
        subject_id: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        let limit = self.fallback.max_requests;
        let mut counters = self.fallback_counters.lock().await;
        let counter = counters
            .entry(QuotaKey::new(subject_id, action))
            .or_insert(FixedWindowCounter {
                window_start: now,
                count: 0,
            });

        if now >= counter.window_start + self.fallback.window {
            counter.window_start = now;
            counter.count = 0;
        }

        if counter.count >= limit {
            let retry_after_ms = (counter.window_start + self.fallback.window - now)
                .num_milliseconds()
                .max(1);
            tracing::warn!(
                subject_id = subject_id,
                action = action,
                limit = limit,
                "admission denied: fixed window exhausted for unconfigured action"
            );
            self.audit.record(AuditEvent::new(
                "rate_limit_exceeded",
                Some(subject_id),
                json!({ "action": action, "limit": limit, "algorithm": "fixed_window" }),
                Severity::Low,
                now,
            ));
            return AdmissionDecision {
                allowed: false,
                algorithm: AdmissionAlgorithm::FixedWindow,
                limit,
                remaining: 0,
                retry_after_ms,
            };
        }

        counter.count += 1;
        AdmissionDecision {
            allowed: true,
            algorithm: AdmissionAlgorithm::FixedWindow,
            limit,
            remaining: limit - counter.count,
            retry_after_ms: 0,
        }
    }

    async fn entry(
        &self,
        subject_id: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Arc<Mutex<QuotaRecord>> {
        let key = QuotaKey::new(subject_id, action);
        {
            let records = self.records.read().await;
            if let Some(record) = records.get(&key) {
                return record.clone();
            }
        }
        let mut records = self.records.write().await;
        records
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(QuotaRecord::new(now))))
            .clone()
    }

    pub async fn stats(&self, subject_id: &str, action: &str) -> Option<BehaviorSnapshot> {
        let record = self
            .records
            .read()
            .await
            .get(&QuotaKey::new(subject_id, action))
            .cloned()?;
        let snapshot = record.lock().await.snapshot();
        Some(snapshot)
    }

    /// Drop every quota record of the subject. Returns how many were removed.
    pub async fn reset_subject(&self, subject_id: &str) -> usize {
        let removed = {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|key, _| key.subject_id != subject_id);
            before - records.len()
        };
        self.fallback_counters
            .lock()
            .await
            .retain(|key, _| key.subject_id != subject_id);
        tracing::info!(subject_id = subject_id, removed = removed, "admission state reset");
        removed
    }

    /// Count one more suspicious activity on every record of the subject.
    pub async fn tighten_subject(&self, subject_id: &str) -> usize {
        let records = self.subject_records(subject_id).await;
        for record in &records {
            record.lock().await.behavior.suspicious_activity += 1;
        }
        tracing::info!(subject_id = subject_id, records = records.len(), "admission state tightened");
        records.len()
    }

    /// Denials recorded for the subject across all configured actions.
    pub async fn violations_for(&self, subject_id: &str) -> u32 {
        let mut total = 0u32;
        for record in self.subject_records(subject_id).await {
            total = total.saturating_add(record.lock().await.violations);
        }
        total
    }

    async fn subject_records(&self, subject_id: &str) -> Vec<Arc<Mutex<QuotaRecord>>> {
        self.records
            .read()
            .await
            .iter()
            .filter(|(key, _)| key.subject_id == subject_id)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Remove records and fallback counters idle for longer than both their
    /// window and the idle TTL. Records currently locked by a caller are kept.
    pub async fn prune_idle(&self) -> usize {
        let now = self.clock.now();
        let idle_ttl = ChronoDuration::minutes(IDLE_RECORD_TTL_MINUTES);
        let configs = self.configs.read().await.clone();

        let removed_records = {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|key, record| {
                let window = configs
                    .get(&key.action)
                    .map(|config| config.time_window)
                    .unwrap_or_else(ChronoDuration::zero);
                match record.try_lock() {
                    Ok(guard) => now - guard.last_seen < window.max(idle_ttl),
                    Err(_) => true,
                }
            });
            before - records.len()
        };

        let removed_counters = {
            let mut counters = self.fallback_counters.lock().await;
            let before = counters.len();
            let window = self.fallback.window;
            counters.retain(|_, counter| now < counter.window_start + window.max(idle_ttl));
            before - counters.len()
        };

        if removed_records + removed_counters > 0 {
            tracing::debug!(
                records = removed_records,
                counters = removed_counters,
                "pruned idle admission state"
            );
        }
        removed_records + removed_counters
    }

    pub async fn tracked_keys(&self) -> usize {
        self.records.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sinks::MemoryAuditSink;
    use chrono::TimeZone;

    fn controller() -> (Arc<AdmissionController>, Arc<ManualClock>, Arc<MemoryAuditSink>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 10, 14, 0, 0).unwrap(),
        ));
        let audit = Arc::new(MemoryAuditSink::default());
        let controller = Arc::new(AdmissionController::new(
            FallbackConfig::default(),
            clock.clone(),
            audit.clone(),
        ));
        (controller, clock, audit)
    }

    fn behavior(age: f64, success_rate: f64, total: u64) -> Behavior {
        Behavior {
            success_rate,
            average_interval_ms: None,
            total_requests: total,
            suspicious_activity: 0,
            account_age_days: age,
        }
    }

    #[tokio::test]
    async fn sixth_call_in_window_is_denied_for_established_account() {
        let (controller, clock, audit) = controller();
        controller
            .configure("post_create", ActionConfig::new(5, ChronoDuration::seconds(60)))
            .await
            .unwrap();

        for call in 1..=5 {
            assert!(
                controller.admit("alice", "post_create", 60.0, true).await,
                "call {call} should be admitted"
            );
            clock.advance(ChronoDuration::seconds(2));
        }
        assert!(!controller.admit("alice", "post_create", 60.0, true).await);

        let stats = controller.stats("alice", "post_create").await.unwrap();
        assert_eq!(stats.violations, 1);
        assert_eq!(stats.requests_in_window, 5);
        assert_eq!(stats.behavior.suspicious_activity, 1);
        assert_eq!(audit.count("rate_limit_exceeded"), 1);
    }

    #[test]
    fn new_account_gets_thirty_percent_of_base_limit() {
        let config = ActionConfig::new(10, ChronoDuration::seconds(60));
        assert_eq!(adapted_limit(&config, &behavior(0.5, 1.0, 1)), 3);
        assert_eq!(adapted_limit(&config, &behavior(3.0, 1.0, 1)), 6);
        assert_eq!(adapted_limit(&config, &behavior(14.0, 1.0, 1)), 8);
        assert_eq!(adapted_limit(&config, &behavior(90.0, 1.0, 1)), 10);
    }

    #[tokio::test]
    async fn first_call_of_new_account_reports_reduced_limit() {
        let (controller, _clock, _audit) = controller();
        controller
            .configure("quiz_submit", ActionConfig::new(10, ChronoDuration::seconds(60)))
            .await
            .unwrap();
        let decision = controller.check("bob", "quiz_submit", 0.5, true).await;
        assert!(decision.allowed);
        assert_eq!(decision.limit, 3);
        assert_eq!(decision.remaining, 2);
    }

    #[test]
    fn success_rate_tiers_apply_after_enough_history() {
        let config = ActionConfig::new(10, ChronoDuration::seconds(60));
        assert_eq!(adapted_limit(&config, &behavior(60.0, 1.0, 9)), 10);
        assert_eq!(adapted_limit(&config, &behavior(60.0, 1.0, 10)), 12);
        assert_eq!(adapted_limit(&config, &behavior(60.0, 0.5, 10)), 5);
        assert_eq!(adapted_limit(&config, &behavior(60.0, 0.8, 50)), 10);
    }

    #[test]
    fn adapted_limit_never_drops_below_one() {
        let config = ActionConfig::new(1, ChronoDuration::seconds(1));
        for age in [0.0, 0.5, 3.0, 10.0, 365.0] {
            for success_rate in [0.0, 0.5, 0.8, 1.0] {
                for suspicious in [0, 1, 3, 10, 1000] {
                    for interval in [None, Some(0.0), Some(500.0), Some(5000.0)] {
                        let behavior = Behavior {
                            success_rate,
                            average_interval_ms: interval,
                            total_requests: 100,
                            suspicious_activity: suspicious,
                            account_age_days: age,
                        };
                        assert!(adapted_limit(&config, &behavior) >= 1);
                    }
                }
            }
        }
    }

    #[test]
    fn adapted_limit_is_deterministic() {
        let config = ActionConfig::new(40, ChronoDuration::minutes(5));
        let sample = Behavior {
            success_rate: 0.66,
            average_interval_ms: Some(2500.0),
            total_requests: 31,
            suspicious_activity: 2,
            account_age_days: 12.0,
        };
        let first = adapted_limit(&config, &sample);
        assert_eq!(first, adapted_limit(&config, &sample.clone()));
        // 40 x 0.8 x 0.5 x 0.4 = 6.4
        assert_eq!(first, 6);
    }

    #[tokio::test]
    async fn elapsed_window_starts_from_empty_sequence() {
        let (controller, clock, _audit) = controller();
        controller
            .configure("comment_create", ActionConfig::new(2, ChronoDuration::seconds(30)))
            .await
            .unwrap();

        assert!(controller.admit("carol", "comment_create", 60.0, true).await);
        clock.advance(ChronoDuration::seconds(5));
        assert!(controller.admit("carol", "comment_create", 60.0, true).await);
        clock.advance(ChronoDuration::seconds(5));
        assert!(!controller.admit("carol", "comment_create", 60.0, true).await);

        clock.advance(ChronoDuration::seconds(30));
        let decision = controller.check("carol", "comment_create", 60.0, true).await;
        let stats = controller.stats("carol", "comment_create").await.unwrap();
        assert_eq!(stats.requests_in_window, 1);
        assert!(decision.allowed);
        assert_eq!(stats.behavior.average_interval_ms, None);
    }

    #[tokio::test]
    async fn rapid_repeats_shrink_the_limit() {
        let (controller, clock, _audit) = controller();
        controller
            .configure("message_send", ActionConfig::new(10, ChronoDuration::seconds(60)))
            .await
            .unwrap();

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(controller.admit("dave", "message_send", 60.0, true).await);
            clock.advance(ChronoDuration::milliseconds(100));
        }
        assert_eq!(outcomes, vec![true, true, true, false]);
        let stats = controller.stats("dave", "message_send").await.unwrap();
        assert_eq!(stats.adapted_limit, 3);
        assert_eq!(stats.behavior.average_interval_ms, Some(100.0));
    }

    #[tokio::test]
    async fn failing_subject_is_halved_once_history_is_long_enough() {
        let (controller, clock, _audit) = controller();
        controller
            .configure("login", ActionConfig::new(20, ChronoDuration::hours(1)))
            .await
            .unwrap();

        let mut admitted = 0;
        for _ in 0..11 {
            if controller.admit("eve", "login", 60.0, false).await {
                admitted += 1;
            }
            clock.advance(ChronoDuration::seconds(2));
        }
        assert_eq!(admitted, 10);
        let stats = controller.stats("eve", "login").await.unwrap();
        assert_eq!(stats.behavior.success_rate, 0.0);
        assert_eq!(stats.adapted_limit, 10);
    }

    #[tokio::test]
    async fn success_rate_is_exact_incremental_mean() {
        let (controller, clock, _audit) = controller();
        controller
            .configure("purchase", ActionConfig::new(50, ChronoDuration::hours(1)))
            .await
            .unwrap();
        for outcome in [true, false, true, true] {
            controller.admit("frank", "purchase", 60.0, outcome).await;
            clock.advance(ChronoDuration::seconds(3));
        }
        let stats = controller.stats("frank", "purchase").await.unwrap();
        assert!((stats.behavior.success_rate - 0.75).abs() < 1e-12);
        assert_eq!(stats.behavior.total_requests, 4);
    }

    #[tokio::test]
    async fn unconfigured_action_uses_fixed_window() {
        let (controller, clock, _audit) = controller();
        for _ in 0..10 {
            let decision = controller.check("gina", "export", 0.0, true).await;
            assert!(decision.allowed);
            assert_eq!(decision.algorithm, AdmissionAlgorithm::FixedWindow);
        }
        let denied = controller.check("gina", "export", 0.0, true).await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_ms, 60_000);

        clock.advance(ChronoDuration::seconds(60));
        assert!(controller.admit("gina", "export", 0.0, true).await);
        assert!(controller.stats("gina", "export").await.is_none());
    }

    #[tokio::test]
    async fn reset_subject_only_touches_that_subject() {
        let (controller, clock, _audit) = controller();
        controller
            .configure("post_create", ActionConfig::new(5, ChronoDuration::minutes(1)))
            .await
            .unwrap();
        controller
            .configure("login", ActionConfig::new(5, ChronoDuration::minutes(1)))
            .await
            .unwrap();

        controller.admit("henry", "post_create", 60.0, true).await;
        controller.admit("henry", "login", 60.0, true).await;
        controller.admit("iris", "login", 60.0, true).await;
        clock.advance(ChronoDuration::seconds(1));

        assert_eq!(controller.reset_subject("henry").await, 2);
        assert!(controller.stats("henry", "post_create").await.is_none());
        assert!(controller.stats("henry", "login").await.is_none());
        assert!(controller.stats("iris", "login").await.is_some());
    }

    #[tokio::test]
    async fn tighten_lowers_next_limit() {
        let (controller, clock, _audit) = controller();
        controller
            .configure("post_create", ActionConfig::new(10, ChronoDuration::minutes(10)))
            .await
            .unwrap();
        controller.admit("ivan", "post_create", 60.0, true).await;
        clock.advance(ChronoDuration::seconds(5));

        assert_eq!(controller.tighten_subject("ivan").await, 1);
        let decision = controller.check("ivan", "post_create", 60.0, true).await;
        assert_eq!(decision.limit, 7);
    }

    #[tokio::test]
    async fn violations_sum_across_actions() {
        let (controller, clock, _audit) = controller();
        controller
            .configure("a", ActionConfig::new(1, ChronoDuration::minutes(1)))
            .await
            .unwrap();
        controller
            .configure("b", ActionConfig::new(1, ChronoDuration::minutes(1)))
            .await
            .unwrap();
        for action in ["a", "a", "b", "b", "b"] {
            controller.admit("judy", action, 60.0, true).await;
            clock.advance(ChronoDuration::seconds(2));
        }
        assert_eq!(controller.violations_for("judy").await, 3);
        assert_eq!(controller.violations_for("nobody").await, 0);
    }

    #[tokio::test]
    async fn prune_idle_drops_stale_records() {
        let (controller, clock, _audit) = controller();
        controller
            .configure("login", ActionConfig::new(5, ChronoDuration::minutes(1)))
            .await
            .unwrap();
        controller.admit("kate", "login", 60.0, true).await;
        controller.admit("kate", "unconfigured", 60.0, true).await;

        clock.advance(ChronoDuration::minutes(30));
        assert_eq!(controller.prune_idle().await, 0);

        clock.advance(ChronoDuration::minutes(31));
        assert_eq!(controller.prune_idle().await, 2);
        assert_eq!(controller.tracked_keys().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_cannot_race_past_the_quota() {
        let (controller, _clock, _audit) = controller();
        controller
            .configure("message_send", ActionConfig::new(5, ChronoDuration::minutes(1)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let controller = controller.clone();
            handles.push(tokio::spawn(async move {
                controller.admit("lena", "message_send", 60.0, true).await
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        // Identical instants collapse the interval to 0 ms, so the limit
        // drops to 1 once two requests are in the window.
        assert_eq!(admitted, 2);
        let stats = controller.stats("lena", "message_send").await.unwrap();
        assert_eq!(stats.violations, 48);
        assert_eq!(stats.requests_in_window, 2);
    }

    #[tokio::test]
    async fn configure_rejects_zero_limit() {
        let (controller, _clock, _audit) = controller();
        let result = controller
            .configure("broken", ActionConfig::new(0, ChronoDuration::minutes(1)))
            .await;
        assert!(result.is_err());
        assert!(controller.action_config("broken").await.is_none());
    }
}
