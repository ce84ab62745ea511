use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::alerts::AlertStore;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::detector::{DetectorSettings, ThreatDetector};
use crate::error::GatekeepError;
use crate::maintenance::{self, MaintenanceHandle};
use crate::metrics::{MemoryProbe, MetricsCollector, ProcMemoryProbe};
use crate::mitigation::{EnforcerSettings, MitigationEnforcer};
use crate::rules::{Rule, default_rules};
use crate::sinks::{AuditSink, Notifier, TracingAuditSink, TracingNotifier};
use crate::store::{EphemeralStore, MemoryStore};

/// Collaborators the engine talks to. Defaults log through `tracing`, read
/// `/proc/meminfo` and keep mitigation records in memory.
pub struct EngineDeps {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn EphemeralStore>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn Notifier>,
    pub memory: Arc<dyn MemoryProbe>,
    pub rules: Vec<Rule>,
}

impl EngineDeps {
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new(clock.clone())),
            clock,
            audit: Arc::new(TracingAuditSink),
            notifier: Arc::new(TracingNotifier),
            memory: Arc::new(ProcMemoryProbe),
            rules: default_rules(),
        }
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryProbe>) -> Self {
        self.memory = memory;
        self
    }

    pub fn rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }
}

impl Default for EngineDeps {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

/// One isolated admission-control and threat-detection engine.
///
/// All state is owned by the instance; two engines never share quotas,
/// alerts or mitigation records.
pub struct Gatekeeper {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn EphemeralStore>,
    admission: Arc<AdmissionController>,
    alerts: Arc<AlertStore>,
    metrics: Arc<MetricsCollector>,
    enforcer: Arc<MitigationEnforcer>,
    detector: Arc<ThreatDetector>,
}

impl Gatekeeper {
    pub async fn new(config: EngineConfig, deps: EngineDeps) -> Result<Self, GatekeepError> {
        config.validate()?;

        let admission = Arc::new(AdmissionController::new(
            config.fallback.clone(),
            deps.clock.clone(),
            deps.audit.clone(),
        ));
        for (action, action_config) in &config.actions {
            admission.configure(action, action_config.clone()).await?;
        }

        let alerts = Arc::new(AlertStore::new(config.alerts.clone(), deps.clock.clone()));
        let metrics = Arc::new(MetricsCollector::new(
            config.metrics.clone(),
            alerts.clone(),
            deps.memory,
        ));
        let enforcer = Arc::new(MitigationEnforcer::new(
            deps.store.clone(),
            admission.clone(),
            deps.clock.clone(),
            deps.audit.clone(),
            EnforcerSettings {
                throttle_policy: config.throttle_policy,
                persistence_policy: config.persistence_policy,
                throttle_ttl: config.throttle_ttl,
                recovery_ttl: config.recovery_ttl,
            },
        ));
        let detector = Arc::new(ThreatDetector::new(
            deps.rules,
            DetectorSettings {
                timezone: config.timezone,
                block_ttl: config.block_ttl,
            },
            alerts.clone(),
            enforcer.clone(),
            metrics.clone(),
            admission.clone(),
            deps.notifier,
            deps.audit,
            deps.clock.clone(),
        ));

        tracing::info!(
            actions = config.actions.len(),
            rules = detector.rules().len(),
            timezone = %config.timezone,
            throttle_policy = config.throttle_policy.as_str(),
            persistence_policy = config.persistence_policy.as_str(),
            "gatekeeper initialized"
        );

        Ok(Self {
            config,
            clock: deps.clock,
            store: deps.store,
            admission,
            alerts,
            metrics,
            enforcer,
            detector,
        })
    }

    /// Spawn the periodic alert purge, health checks and state sweeps.
    /// Dropping or shutting down the handle stops them.
    pub fn start_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        maintenance::spawn(self.clone())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn EphemeralStore> {
        &self.store
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn alerts(&self) -> &Arc<AlertStore> {
        &self.alerts
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn enforcer(&self) -> &Arc<MitigationEnforcer> {
        &self.enforcer
    }

    pub fn detector(&self) -> &Arc<ThreatDetector> {
        &self.detector
    }
}
