//! Adaptive admission control and behavioral threat detection.
//!
//! [`Gatekeeper`] wires the components together: the
//! [`AdmissionController`] answers quota checks, the [`ThreatDetector`]
//! inspects request content and metadata, and matching rules raise alerts
//! into the [`AlertStore`] and apply mitigations through the
//! [`MitigationEnforcer`].

pub mod admission;
pub mod alerts;
pub mod clock;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod maintenance;
pub mod metrics;
pub mod mitigation;
pub mod rules;
pub mod sinks;
pub mod store;

pub use admission::{AdmissionController, AdmissionDecision, BehaviorSnapshot};
pub use alerts::{Alert, AlertStore, Severity};
pub use config::{ActionConfig, EngineConfig, PersistencePolicy, ThrottlePolicy};
pub use detector::{Evaluation, SecurityRequest, ThreatDetector};
pub use engine::{EngineDeps, Gatekeeper};
pub use error::GatekeepError;
pub use maintenance::MaintenanceHandle;
pub use metrics::{AggregateMetrics, MetricsCollector};
pub use mitigation::{BlockRecord, MitigationEnforcer, ThrottleRecord};
pub use sinks::{AuditEvent, AuditSink, Notifier};
