use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::admission::AdmissionController;
use crate::alerts::Severity;
use crate::clock::Clock;
use crate::config::{PersistencePolicy, ThrottlePolicy};
use crate::sinks::{AuditEvent, AuditSink};
use crate::store::EphemeralStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BlockRecord {
    pub subject_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl BlockRecord {
    pub fn expires_at(&self) -> DateTime<Utc> {
        expiry(self.created_at, self.duration_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ThrottleRecord {
    pub subject_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl ThrottleRecord {
    pub fn expires_at(&self) -> DateTime<Utc> {
        expiry(self.created_at, self.duration_ms)
    }
}

fn expiry(created_at: DateTime<Utc>, duration_ms: i64) -> DateTime<Utc> {
    ChronoDuration::try_milliseconds(duration_ms)
        .and_then(|duration| created_at.checked_add_signed(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone)]
pub struct EnforcerSettings {
    pub throttle_policy: ThrottlePolicy,
    pub persistence_policy: PersistencePolicy,
    pub throttle_ttl: ChronoDuration,
    pub recovery_ttl: ChronoDuration,
}

enum Lookup<T> {
    Active(T),
    Expired,
    Malformed,
    Missing,
}

/// Short-lived block and throttle records keyed by subject.
///
/// Records are persisted in the ephemeral store and kept there past their
/// own expiry, so expiry is detected on read: the read deletes the record and
/// puts the subject into recovery for `recovery_ttl`.
pub struct MitigationEnforcer {
    store: Arc<dyn EphemeralStore>,
    admission: Arc<AdmissionController>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    settings: EnforcerSettings,
}

impl MitigationEnforcer {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        admission: Arc<AdmissionController>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        settings: EnforcerSettings,
    ) -> Self {
        Self {
            store,
            admission,
            clock,
            audit,
            settings,
        }
    }

    pub fn throttle_policy(&self) -> ThrottlePolicy {
        self.settings.throttle_policy
    }

    pub fn block(&self, subject_id: &str, reason: &str, ttl: ChronoDuration) -> BlockRecord {
        let now = self.clock.now();
        let record = BlockRecord {
            subject_id: subject_id.to_string(),
            reason: reason.to_string(),
            created_at: now,
            duration_ms: ttl.num_milliseconds(),
        };
        self.persist(&block_key(subject_id), &record, ttl);
        self.store.remove(&recovery_key(subject_id));

        tracing::warn!(
            subject_id = subject_id,
            reason = reason,
            expires_at = %record.expires_at().to_rfc3339(),
            "subject blocked"
        );
        self.audit.record(AuditEvent::new(
            "subject_blocked",
            Some(subject_id),
            json!({ "reason": reason, "duration_ms": record.duration_ms }),
            Severity::High,
            now,
        ));
        record
    }

    pub fn unblock(&self, subject_id: &str) -> bool {
        let removed = self.store.remove(&block_key(subject_id));
        if removed {
            self.audit.record(AuditEvent::new(
                "subject_unblocked",
                Some(subject_id),
                json!({}),
                Severity::Low,
                self.clock.now(),
            ));
        }
        removed
    }

    pub fn is_blocked(&self, subject_id: &str) -> bool {
        match self.lookup_block(subject_id) {
            Lookup::Active(_) => true,
            Lookup::Malformed => self.settings.persistence_policy == PersistencePolicy::FailClosed,
            Lookup::Expired | Lookup::Missing => false,
        }
    }

    pub fn block_record(&self, subject_id: &str) -> Option<BlockRecord> {
        match self.lookup_block(subject_id) {
            Lookup::Active(record) => Some(record),
            _ => None,
        }
    }

    fn lookup_block(&self, subject_id: &str) -> Lookup<BlockRecord> {
        let key = block_key(subject_id);
        let Some(raw) = self.store.get(&key) else {
            return Lookup::Missing;
        };
        let record = match serde_json::from_str::<BlockRecord>(&raw) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    subject_id = subject_id,
                    policy = self.settings.persistence_policy.as_str(),
                    "unreadable block record"
                );
                if self.settings.persistence_policy == PersistencePolicy::FailOpen {
                    self.store.remove(&key);
                }
                return Lookup::Malformed;
            }
        };

        let now = self.clock.now();
        if now < record.expires_at() {
            return Lookup::Active(record);
        }

        self.store.remove(&key);
        self.store
            .set(&recovery_key(subject_id), "1".to_string(), self.settings.recovery_ttl);
        tracing::info!(subject_id = subject_id, "block expired; subject in recovery");
        self.audit.record(AuditEvent::new(
            "block_expired",
            Some(subject_id),
            json!({ "reason": record.reason, "blocked_at": record.created_at }),
            Severity::Low,
            now,
        ));
        Lookup::Expired
    }

    /// Record a throttle and apply the configured policy to the subject's
    /// admission state.
    pub async fn throttle(&self, subject_id: &str, reason: &str) -> ThrottleRecord {
        let now = self.clock.now();
        let ttl = self.settings.throttle_ttl;
        let record = ThrottleRecord {
            subject_id: subject_id.to_string(),
            reason: reason.to_string(),
            created_at: now,
            duration_ms: ttl.num_milliseconds(),
        };
        self.persist(&throttle_key(subject_id), &record, ttl);

        let affected = match self.settings.throttle_policy {
            ThrottlePolicy::ResetBehavior => self.admission.reset_subject(subject_id).await,
            ThrottlePolicy::Tighten => self.admission.tighten_subject(subject_id).await,
        };

        tracing::warn!(
            subject_id = subject_id,
            reason = reason,
            policy = self.settings.throttle_policy.as_str(),
            affected_records = affected,
            "subject throttled"
        );
        self.audit.record(AuditEvent::new(
            "subject_throttled",
            Some(subject_id),
            json!({
                "reason": reason,
                "policy": self.settings.throttle_policy.as_str(),
                "affected_records": affected,
            }),
            Severity::Medium,
            now,
        ));
        record
    }

    pub fn throttle_record(&self, subject_id: &str) -> Option<ThrottleRecord> {
        let key = throttle_key(subject_id);
        let raw = self.store.get(&key)?;
        match serde_json::from_str::<ThrottleRecord>(&raw) {
            Ok(record) if self.clock.now() < record.expires_at() => Some(record),
            Ok(_) => {
                self.store.remove(&key);
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, subject_id = subject_id, "unreadable throttle record");
                self.store.remove(&key);
                None
            }
        }
    }

    pub fn is_throttled(&self, subject_id: &str) -> bool {
        self.throttle_record(subject_id).is_some()
    }

    pub fn is_recovering(&self, subject_id: &str) -> bool {
        self.store.get(&recovery_key(subject_id)).is_some()
    }

    fn persist<T: Serialize>(&self, key: &str, record: &T, ttl: ChronoDuration) {
        match serde_json::to_string(record) {
            // Outlive the record itself so expiry is observed by a read.
            Ok(raw) => {
                let retained = ttl
                    .checked_add(&self.settings.recovery_ttl.max(ChronoDuration::zero()))
                    .unwrap_or(ttl);
                self.store.set(key, raw, retained)
            }
            Err(err) => tracing::warn!(error = %err, key = key, "failed to encode mitigation record"),
        }
    }
}

fn block_key(subject_id: &str) -> String {
    format!("block:{subject_id}")
}

fn throttle_key(subject_id: &str) -> String {
    format!("throttle:{subject_id}")
}

fn recovery_key(subject_id: &str) -> String {
    format!("recovery:{subject_id}")
}
