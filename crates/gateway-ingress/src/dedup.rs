//! Deduplication bucket store for webhook update ids. Specified as an
//! interface with one in-memory reference implementation; alternative
//! backends (e.g. shared cache) are pluggable by implementing [`DedupStore`].

use std::collections::HashMap;
use std::sync::Mutex;

use gateway_core::TimestampMs;

pub trait DedupStore: Send + Sync {
    /// Record `update_id` as seen at `now_ms` if it hasn't been seen within
    /// the store's TTL. Returns `true` if this is the first sighting (the
    /// caller should proceed), `false` if it's a duplicate.
    fn check_and_record(&self, update_id: i64, now_ms: TimestampMs) -> bool;

    /// Drop entries whose `firstSeenMs` predates `now_ms - ttl_ms`.
    fn sweep(&self, now_ms: TimestampMs, ttl_ms: i64);

    fn len(&self) -> usize;
}

pub struct InMemoryDedupStore {
    seen: Mutex<HashMap<i64, TimestampMs>>,
    ttl_ms: i64,
}

impl InMemoryDedupStore {
    pub fn new(ttl_ms: i64) -> Self {
        Self { seen: Mutex::new(HashMap::new()), ttl_ms }
    }
}

impl DedupStore for InMemoryDedupStore {
    fn check_and_record(&self, update_id: i64, now_ms: TimestampMs) -> bool {
        let mut seen = self.seen.lock().expect("dedup mutex poisoned");
        match seen.get(&update_id) {
            Some(first_seen) if now_ms - *first_seen < self.ttl_ms => false,
            _ => {
                seen.insert(update_id, now_ms);
                true
            }
        }
    }

    fn sweep(&self, now_ms: TimestampMs, ttl_ms: i64) {
        let mut seen = self.seen.lock().expect("dedup mutex poisoned");
        seen.retain(|_, first_seen| now_ms - *first_seen < ttl_ms);
    }

    fn len(&self) -> usize {
        self.seen.lock().expect("dedup mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_ttl_is_rejected() {
        let store = InMemoryDedupStore::new(1_000);
        assert!(store.check_and_record(1, 0));
        assert!(!store.check_and_record(1, 500));
    }

    #[test]
    fn same_id_redelivered_after_ttl() {
        let store = InMemoryDedupStore::new(1_000);
        assert!(store.check_and_record(1, 0));
        assert!(store.check_and_record(1, 2_000));
    }

    #[test]
    fn sweep_drops_old_entries() {
        let store = InMemoryDedupStore::new(1_000);
        store.check_and_record(1, 0);
        store.sweep(5_000, 1_000);
        assert_eq!(store.len(), 0);
    }
}
