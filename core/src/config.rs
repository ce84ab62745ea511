use std::str::FromStr;

use chrono::Duration as ChronoDuration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::GatekeepError;

/// Longest accepted quota window.
pub const MAX_TIME_WINDOW_SECS: i64 = 366 * 24 * 60 * 60;
/// Longest accepted block, throttle or recovery TTL.
pub const MAX_MITIGATION_SECS: i64 = 30 * 24 * 60 * 60;

/// Build a duration from a seconds setting, rejecting values chrono cannot
/// represent.
pub fn seconds_setting(field: &str, secs: i64) -> Result<ChronoDuration, GatekeepError> {
    ChronoDuration::try_seconds(secs).ok_or_else(|| {
        GatekeepError::invalid_config(field, format!("{secs} seconds is out of range"))
    })
}

/// Limiter parameters for one action kind.
///
/// `burst_allowance` and `adaptive_factor` are validated and reported but the
/// limit formula does not consume them.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionConfig {
    pub base_limit: u32,
    pub time_window: ChronoDuration,
    pub burst_allowance: u32,
    pub adaptive_factor: f64,
}

impl ActionConfig {
    pub fn new(base_limit: u32, time_window: ChronoDuration) -> Self {
        Self {
            base_limit,
            time_window,
            burst_allowance: 0,
            adaptive_factor: 1.0,
        }
    }

    pub fn with_burst(mut self, burst_allowance: u32, adaptive_factor: f64) -> Self {
        self.burst_allowance = burst_allowance;
        self.adaptive_factor = adaptive_factor;
        self
    }

    pub fn validate(&self, action: &str) -> Result<(), GatekeepError> {
        if self.base_limit == 0 {
            return Err(GatekeepError::invalid_config(
                format!("{action}.base_limit"),
                "must be at least 1",
            ));
        }
        if self.time_window <= ChronoDuration::zero()
            || self.time_window > ChronoDuration::seconds(MAX_TIME_WINDOW_SECS)
        {
            return Err(GatekeepError::invalid_config(
                format!("{action}.time_window"),
                format!("must be between 1 and {MAX_TIME_WINDOW_SECS} seconds"),
            ));
        }
        if !self.adaptive_factor.is_finite() || self.adaptive_factor < 0.0 {
            return Err(GatekeepError::invalid_config(
                format!("{action}.adaptive_factor"),
                "must be a finite, non-negative number",
            ));
        }
        Ok(())
    }
}

/// Quotas for the actions of the host product.
pub fn default_actions() -> Vec<(String, ActionConfig)> {
    vec![
        (
            "login".to_string(),
            ActionConfig::new(5, ChronoDuration::minutes(15)).with_burst(2, 0.5),
        ),
        (
            "post_create".to_string(),
            ActionConfig::new(10, ChronoDuration::hours(1)).with_burst(3, 0.8),
        ),
        (
            "comment_create".to_string(),
            ActionConfig::new(30, ChronoDuration::hours(1)).with_burst(5, 0.8),
        ),
        (
            "message_send".to_string(),
            ActionConfig::new(60, ChronoDuration::minutes(1)).with_burst(10, 0.7),
        ),
        (
            "quiz_submit".to_string(),
            ActionConfig::new(20, ChronoDuration::hours(1)).with_burst(5, 0.9),
        ),
        (
            "purchase".to_string(),
            ActionConfig::new(10, ChronoDuration::hours(1)).with_burst(2, 0.5),
        ),
    ]
}

/// Parse `name:base_limit:window_secs[:burst[:factor]]` entries separated by commas.
pub fn parse_action_list(raw: &str) -> Result<Vec<(String, ActionConfig)>, GatekeepError> {
    let mut actions = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        if !(3..=5).contains(&parts.len()) || parts[0].is_empty() {
            return Err(GatekeepError::invalid_config(
                "GATEKEEP_ACTIONS",
                format!("entry '{entry}' must look like name:base_limit:window_secs[:burst[:factor]]"),
            ));
        }
        let name = parts[0].to_string();
        let base_limit = parse_part::<u32>(entry, "base_limit", parts[1])?;
        let window_secs = parse_part::<i64>(entry, "window_secs", parts[2])?;
        let burst = parts
            .get(3)
            .map(|value| parse_part::<u32>(entry, "burst", value))
            .transpose()?
            .unwrap_or(0);
        let factor = parts
            .get(4)
            .map(|value| parse_part::<f64>(entry, "factor", value))
            .transpose()?
            .unwrap_or(1.0);

        let window = seconds_setting(&format!("{name}.time_window"), window_secs)?;
        let config = ActionConfig::new(base_limit, window).with_burst(burst, factor);
        config.validate(&name)?;
        actions.push((name, config));
    }
    Ok(actions)
}

fn parse_part<T: FromStr>(entry: &str, field: &str, value: &str) -> Result<T, GatekeepError> {
    value.parse::<T>().map_err(|_| {
        GatekeepError::invalid_config(
            "GATEKEEP_ACTIONS",
            format!("entry '{entry}' has an invalid {field} '{value}'"),
        )
    })
}

/// How a `throttle` rule action treats the subject's admission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePolicy {
    /// Drop the subject's quota records, which relieves the subject.
    ResetBehavior,
    /// Raise the subject's suspicious-activity count so its limits shrink.
    Tighten,
}

impl ThrottlePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ThrottlePolicy::ResetBehavior => "reset_behavior",
            ThrottlePolicy::Tighten => "tighten",
        }
    }

    pub fn from_env_value(value: &str) -> Self {
        match value {
            "tighten" => ThrottlePolicy::Tighten,
            _ => ThrottlePolicy::ResetBehavior,
        }
    }
}

/// What an unreadable persisted block record means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PersistencePolicy {
    /// Treat malformed records as absent (not blocked).
    FailOpen,
    /// Treat malformed records as blocked until they expire from the store.
    FailClosed,
}

impl PersistencePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            PersistencePolicy::FailOpen => "fail_open",
            PersistencePolicy::FailClosed => "fail_closed",
        }
    }

    pub fn from_env_value(value: &str) -> Self {
        match value {
            "fail_closed" => PersistencePolicy::FailClosed,
            _ => PersistencePolicy::FailOpen,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertStoreConfig {
    pub hard_cap: usize,
    pub trim_to: usize,
    pub resolved_retention: ChronoDuration,
    pub low_severity_auto_resolve: ChronoDuration,
}

impl Default for AlertStoreConfig {
    fn default() -> Self {
        Self {
            hard_cap: 1000,
            trim_to: 500,
            resolved_retention: ChronoDuration::hours(24),
            low_severity_auto_resolve: ChronoDuration::hours(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub sample_capacity: usize,
    pub latency_alert_ms: f64,
    pub memory_alert_percent: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_capacity: 100,
            latency_alert_ms: 2000.0,
            memory_alert_percent: 90.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub alert_purge_every: std::time::Duration,
    pub latency_check_every: std::time::Duration,
    pub memory_check_every: std::time::Duration,
    pub quota_sweep_every: std::time::Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            alert_purge_every: std::time::Duration::from_secs(60 * 60),
            latency_check_every: std::time::Duration::from_secs(60),
            memory_check_every: std::time::Duration::from_secs(30),
            quota_sweep_every: std::time::Duration::from_secs(5 * 60),
        }
    }
}

/// Fixed-window counter used for actions without an [`ActionConfig`].
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub max_requests: u32,
    pub window: ChronoDuration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: ChronoDuration::seconds(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub actions: Vec<(String, ActionConfig)>,
    pub fallback: FallbackConfig,
    pub timezone: Tz,
    pub throttle_policy: ThrottlePolicy,
    pub persistence_policy: PersistencePolicy,
    pub block_ttl: ChronoDuration,
    pub throttle_ttl: ChronoDuration,
    pub recovery_ttl: ChronoDuration,
    pub alerts: AlertStoreConfig,
    pub metrics: MetricsConfig,
    pub maintenance: MaintenanceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            actions: default_actions(),
            fallback: FallbackConfig::default(),
            timezone: Tz::UTC,
            throttle_policy: ThrottlePolicy::ResetBehavior,
            persistence_policy: PersistencePolicy::FailOpen,
            block_ttl: ChronoDuration::minutes(5),
            throttle_ttl: ChronoDuration::minutes(5),
            recovery_ttl: ChronoDuration::minutes(10),
            alerts: AlertStoreConfig::default(),
            metrics: MetricsConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build the configuration from `GATEKEEP_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, GatekeepError> {
        let mut config = EngineConfig::default();

        if let Ok(raw) = std::env::var("GATEKEEP_ACTIONS") {
            config.actions = parse_action_list(&raw)?;
        }
        if let Ok(raw) = std::env::var("GATEKEEP_TIMEZONE") {
            config.timezone = raw.parse::<Tz>().map_err(|_| {
                GatekeepError::invalid_config("GATEKEEP_TIMEZONE", format!("unknown time zone '{raw}'"))
            })?;
        }
        if let Ok(raw) = std::env::var("GATEKEEP_THROTTLE_POLICY") {
            config.throttle_policy = ThrottlePolicy::from_env_value(raw.trim().to_lowercase().as_str());
        }
        if let Ok(raw) = std::env::var("GATEKEEP_PERSISTENCE_POLICY") {
            config.persistence_policy =
                PersistencePolicy::from_env_value(raw.trim().to_lowercase().as_str());
        }

        config.fallback.max_requests =
            env_or("GATEKEEP_FALLBACK_LIMIT", config.fallback.max_requests);
        config.fallback.window = seconds_setting(
            "GATEKEEP_FALLBACK_WINDOW_SECS",
            env_or("GATEKEEP_FALLBACK_WINDOW_SECS", 60),
        )?;
        config.block_ttl =
            seconds_setting("GATEKEEP_BLOCK_TTL_SECS", env_or("GATEKEEP_BLOCK_TTL_SECS", 300))?;
        config.throttle_ttl =
            seconds_setting("GATEKEEP_THROTTLE_TTL_SECS", env_or("GATEKEEP_THROTTLE_TTL_SECS", 300))?;
        config.recovery_ttl =
            seconds_setting("GATEKEEP_RECOVERY_TTL_SECS", env_or("GATEKEEP_RECOVERY_TTL_SECS", 600))?;

        config.alerts.hard_cap = env_or("GATEKEEP_ALERT_HARD_CAP", config.alerts.hard_cap);
        config.alerts.trim_to = env_or("GATEKEEP_ALERT_TRIM_TO", config.alerts.trim_to);
        config.metrics.latency_alert_ms =
            env_or("GATEKEEP_LATENCY_ALERT_MS", config.metrics.latency_alert_ms);
        config.metrics.memory_alert_percent =
            env_or("GATEKEEP_MEMORY_ALERT_PERCENT", config.metrics.memory_alert_percent);

        config.maintenance.latency_check_every =
            std::time::Duration::from_secs(env_or("GATEKEEP_LATENCY_CHECK_SECS", 60));
        config.maintenance.memory_check_every =
            std::time::Duration::from_secs(env_or("GATEKEEP_MEMORY_CHECK_SECS", 30));

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GatekeepError> {
        for (name, action) in &self.actions {
            action.validate(name)?;
        }
        if self.fallback.max_requests == 0
            || self.fallback.window <= ChronoDuration::zero()
            || self.fallback.window > ChronoDuration::seconds(MAX_TIME_WINDOW_SECS)
        {
            return Err(GatekeepError::invalid_config(
                "fallback",
                "limit must be positive and the window within range",
            ));
        }
        if self.alerts.trim_to == 0 || self.alerts.trim_to > self.alerts.hard_cap {
            return Err(GatekeepError::invalid_config(
                "alerts.trim_to",
                "must be between 1 and the hard cap",
            ));
        }
        let max_mitigation = ChronoDuration::seconds(MAX_MITIGATION_SECS);
        for (field, ttl) in [("block_ttl", self.block_ttl), ("throttle_ttl", self.throttle_ttl)] {
            if ttl <= ChronoDuration::zero() || ttl > max_mitigation {
                return Err(GatekeepError::invalid_config(
                    field,
                    format!("must be between 1 and {MAX_MITIGATION_SECS} seconds"),
                ));
            }
        }
        // Mitigation records are retained for their TTL plus this.
        if self.recovery_ttl < ChronoDuration::zero() || self.recovery_ttl > max_mitigation {
            return Err(GatekeepError::invalid_config(
                "recovery_ttl",
                format!("must be between 0 and {MAX_MITIGATION_SECS} seconds"),
            ));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "ignoring unparsable setting");
                default
            }
        },
        Err(_) => default,
    }
}
