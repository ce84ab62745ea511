use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::alerts::{Alert, AlertStore, Severity};
use crate::config::MetricsConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, utoipa::ToSchema)]
pub struct AggregateMetrics {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub suspicious_activities: u64,
    /// Rolling average over the retained latency samples
    pub average_response_time_ms: f64,
    pub error_rate: f64,
}

/// Source of the memory utilization reading used by the health check.
pub trait MemoryProbe: Send + Sync {
    /// Percentage in [0, 100], or `None` when no reading is available.
    fn utilization_percent(&self) -> Option<f64>;
}

/// Process resident set size as a share of the memory available to it.
///
/// The limit is the cgroup v2 `memory.max` when one is set, otherwise the
/// host's `MemTotal`.
#[derive(Debug, Default)]
pub struct ProcMemoryProbe;

const CGROUP_MEMORY_MAX: &str = "/sys/fs/cgroup/memory.max";

impl MemoryProbe for ProcMemoryProbe {
    fn utilization_percent(&self) -> Option<f64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let rss_kb = parse_status_rss_kb(&status)?;
        let limit_kb = std::fs::read_to_string(CGROUP_MEMORY_MAX)
            .ok()
            .and_then(|raw| parse_cgroup_limit_kb(&raw))
            .or_else(|| {
                std::fs::read_to_string("/proc/meminfo")
                    .ok()
                    .and_then(|content| parse_meminfo_total_kb(&content))
            })?;
        process_utilization(rss_kb, limit_kb)
    }
}

pub fn parse_status_rss_kb(status: &str) -> Option<f64> {
    kb_field(status, "VmRSS:")
}

pub fn parse_meminfo_total_kb(content: &str) -> Option<f64> {
    kb_field(content, "MemTotal:")
}

/// `memory.max` holds a byte count, or `max` when the cgroup is unbounded.
pub fn parse_cgroup_limit_kb(raw: &str) -> Option<f64> {
    let bytes = raw.trim().parse::<f64>().ok()?;
    (bytes > 0.0).then_some(bytes / 1024.0)
}

pub fn process_utilization(rss_kb: f64, limit_kb: f64) -> Option<f64> {
    if limit_kb <= 0.0 || rss_kb < 0.0 {
        return None;
    }
    Some((rss_kb / limit_kb * 100.0).min(100.0))
}

fn kb_field(content: &str, name: &str) -> Option<f64> {
    content.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next()? != name {
            return None;
        }
        parts.next()?.parse::<f64>().ok()
    })
}

/// Fixed reading, for tests and hosts without a memory source.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe(pub Option<f64>);

impl MemoryProbe for FixedMemoryProbe {
    fn utilization_percent(&self) -> Option<f64> {
        self.0
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    aggregate: AggregateMetrics,
    samples: VecDeque<f64>,
}

pub struct MetricsCollector {
    config: MetricsConfig,
    state: RwLock<MetricsState>,
    alerts: Arc<AlertStore>,
    probe: Arc<dyn MemoryProbe>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig, alerts: Arc<AlertStore>, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            config,
            state: RwLock::new(MetricsState::default()),
            alerts,
            probe,
        }
    }

    pub async fn record_response_time(&self, elapsed_ms: f64) {
        if !elapsed_ms.is_finite() || elapsed_ms < 0.0 {
            return;
        }
        let mut state = self.state.write().await;
        state.samples.push_back(elapsed_ms);
        while state.samples.len() > self.config.sample_capacity {
            state.samples.pop_front();
        }
    }

    /// Count one evaluated request and fold its outcome into the error rate.
    pub async fn record_request(&self, success: bool) {
        let mut state = self.state.write().await;
        let aggregate = &mut state.aggregate;
        aggregate.total_requests += 1;
        let outcome = if success { 0.0 } else { 1.0 };
        aggregate.error_rate += (outcome - aggregate.error_rate) / aggregate.total_requests as f64;
    }

    pub async fn record_blocked(&self) {
        self.state.write().await.aggregate.blocked_requests += 1;
    }

    pub async fn record_suspicious(&self) {
        self.state.write().await.aggregate.suspicious_activities += 1;
    }

    pub async fn snapshot(&self) -> AggregateMetrics {
        self.state.read().await.aggregate.clone()
    }

    pub async fn recompute_average(&self) -> f64 {
        let mut state = self.state.write().await;
        let average = if state.samples.is_empty() {
            0.0
        } else {
            state.samples.iter().sum::<f64>() / state.samples.len() as f64
        };
        state.aggregate.average_response_time_ms = average;
        average
    }

    /// Recompute the rolling latency and alert when it exceeds the threshold.
    pub async fn check_latency(&self) -> Option<Alert> {
        let average = self.recompute_average().await;
        if average <= self.config.latency_alert_ms {
            return None;
        }
        tracing::warn!(
            average_response_time_ms = average,
            threshold_ms = self.config.latency_alert_ms,
            "response time degradation"
        );
        let alert = self
            .alerts
            .raise(
                None,
                "performance_degradation",
                Severity::Medium,
                json!({
                    "average_response_time_ms": average,
                    "threshold_ms": self.config.latency_alert_ms,
                }),
            )
            .await;
        Some(alert)
    }

    pub async fn check_memory(&self) -> Option<Alert> {
        let utilization = self.probe.utilization_percent()?;
        if utilization <= self.config.memory_alert_percent {
            return None;
        }
        tracing::warn!(
            utilization_percent = utilization,
            threshold_percent = self.config.memory_alert_percent,
            "memory pressure"
        );
        let alert = self
            .alerts
            .raise(
                None,
                "memory_pressure",
                Severity::High,
                json!({
                    "utilization_percent": utilization,
                    "threshold_percent": self.config.memory_alert_percent,
                }),
            )
            .await;
        Some(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::AlertStoreConfig;

    fn collector(memory: Option<f64>) -> (MetricsCollector, Arc<AlertStore>) {
        let alerts = Arc::new(AlertStore::new(
            AlertStoreConfig::default(),
            Arc::new(SystemClock),
        ));
        let collector = MetricsCollector::new(
            MetricsConfig::default(),
            alerts.clone(),
            Arc::new(FixedMemoryProbe(memory)),
        );
        (collector, alerts)
    }

    #[tokio::test]
    async fn error_rate_is_incremental_mean_of_failures() {
        let (collector, _alerts) = collector(None);
        for success in [true, false, true, false] {
            collector.record_request(success).await;
        }
        let snapshot = collector.snapshot().await;
        assert_eq!(snapshot.total_requests, 4);
        assert!((snapshot.error_rate - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn latency_buffer_keeps_latest_samples_only() {
        let (collector, _alerts) = collector(None);
        for _ in 0..100 {
            collector.record_response_time(10.0).await;
        }
        for _ in 0..100 {
            collector.record_response_time(30.0).await;
        }
        assert_eq!(collector.recompute_average().await, 30.0);
    }

    #[tokio::test]
    async fn slow_average_raises_degradation_alert() {
        let (collector, alerts) = collector(None);
        collector.record_response_time(1500.0).await;
        assert!(collector.check_latency().await.is_none());

        collector.record_response_time(3000.0).await;
        let alert = collector.check_latency().await.expect("alert expected");
        assert_eq!(alert.rule_type, "performance_degradation");
        assert_eq!(alert.severity, Severity::Medium);
        assert_eq!(alerts.len().await, 1);
        assert_eq!(collector.snapshot().await.average_response_time_ms, 2250.0);
    }

    #[tokio::test]
    async fn memory_alert_only_above_threshold() {
        let (calm, calm_alerts) = collector(Some(72.0));
        assert!(calm.check_memory().await.is_none());
        assert!(calm_alerts.is_empty().await);

        let (pressured, _alerts) = collector(Some(93.5));
        let alert = pressured.check_memory().await.expect("alert expected");
        assert_eq!(alert.rule_type, "memory_pressure");
        assert_eq!(alert.severity, Severity::High);

        let (blind, _alerts) = collector(None);
        assert!(blind.check_memory().await.is_none());
    }

    #[test]
    fn process_memory_is_measured_against_cgroup_limit() {
        let status = "Name:\tgatekeep-api\nVmPeak:\t  900000 kB\nVmRSS:\t  393216 kB\n";
        let rss = parse_status_rss_kb(status).unwrap();
        let limit = parse_cgroup_limit_kb("536870912\n").unwrap();
        let utilization = process_utilization(rss, limit).unwrap();
        assert!((utilization - 75.0).abs() < 1e-9);
    }

    #[test]
    fn unbounded_cgroup_falls_back_to_host_total() {
        assert!(parse_cgroup_limit_kb("max\n").is_none());
        let meminfo = "MemTotal:       16000000 kB\nMemAvailable:    4000000 kB\n";
        assert_eq!(parse_meminfo_total_kb(meminfo), Some(16_000_000.0));
        assert!(parse_status_rss_kb("VmPeak: 10 kB").is_none());
        assert!(process_utilization(10.0, 0.0).is_none());
    }
}
