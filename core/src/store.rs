use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::clock::Clock;

/// Session-scoped key-value storage with per-entry TTL.
///
/// Expired entries read as absent. Values are opaque strings; callers own the
/// encoding and must treat anything they cannot decode as absent too.
pub trait EphemeralStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String, ttl: ChronoDuration);
    fn remove(&self, key: &str) -> bool;
    /// Delete expired entries and return how many were dropped.
    fn sweep(&self) -> usize;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EphemeralStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match entries.get(key) {
            Some(stored) if stored.expires_at > now => Some(stored.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: String, ttl: ChronoDuration) {
        let now = self.clock.now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if ttl <= ChronoDuration::zero() {
            entries.remove(key);
            return;
        }
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        entries.insert(key.to_string(), StoredValue { value, expires_at });
    }

    fn remove(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key)
            .is_some()
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = entries.len();
        entries.retain(|_, stored| stored.expires_at > now);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{EphemeralStore, MemoryStore};
    use crate::clock::ManualClock;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;

    #[test]
    fn entries_expire_on_read_and_sweep() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryStore::new(clock.clone());
        store.set("a", "1".to_string(), ChronoDuration::seconds(10));
        store.set("b", "2".to_string(), ChronoDuration::seconds(60));

        assert_eq!(store.get("a").as_deref(), Some("1"));
        clock.advance(ChronoDuration::seconds(10));
        assert_eq!(store.get("a"), None);
        assert_eq!(store.len(), 1);

        clock.advance(ChronoDuration::seconds(60));
        assert_eq!(store.sweep(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn non_positive_ttl_clears_and_huge_ttl_saturates() {
        let store = MemoryStore::new(Arc::new(ManualClock::new(Utc::now())));
        store.set("k", "v".to_string(), ChronoDuration::minutes(1));
        store.set("k", "w".to_string(), ChronoDuration::seconds(-300));
        assert_eq!(store.get("k"), None);
        assert!(store.is_empty());

        store.set("forever", "v".to_string(), ChronoDuration::milliseconds(i64::MAX));
        assert_eq!(store.get("forever").as_deref(), Some("v"));
    }

    #[test]
    fn remove_reports_presence() {
        let store = MemoryStore::new(Arc::new(ManualClock::new(Utc::now())));
        store.set("k", "v".to_string(), ChronoDuration::minutes(1));
        assert!(store.remove("k"));
        assert!(!store.remove("k"));
    }
}
