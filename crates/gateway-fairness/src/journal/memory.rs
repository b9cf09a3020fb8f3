use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use gateway_core::Timestamp;

use super::{DrawKey, JournalError, RngCommitState, RngDrawRecord, RngJournal};

const DEFAULT_TTL_SECS: i64 = 30 * 24 * 3600;

#[derive(Default)]
struct Inner {
    commits: HashMap<String, RngCommitState>,
    draws: HashMap<(String, i64, String), RngDrawRecord>,
}

/// In-memory RNG journal. Entries older than `ttl_secs` are dropped lazily
/// on the next access that touches them, matching the "background-free"
/// cleanup the spec calls for on this backend.
pub struct InMemoryRngJournal {
    inner: Mutex<Inner>,
    ttl_secs: i64,
}

impl InMemoryRngJournal {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL_SECS)
    }

    pub fn with_ttl(ttl_secs: i64) -> Self {
        Self { inner: Mutex::new(Inner::default()), ttl_secs }
    }

    fn sweep(&self, inner: &mut Inner, now: Timestamp) {
        inner.commits.retain(|_, c| now - c.committed_at() < self.ttl_secs);
        inner.draws.retain(|_, d| now - d.created_at < self.ttl_secs);
    }
}

impl Default for InMemoryRngJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RngJournal for InMemoryRngJournal {
    async fn upsert_commit(
        &self,
        day_utc: &str,
        server_seed_hash: &str,
        committed_at: Timestamp,
    ) -> Result<RngCommitState, JournalError> {
        let mut inner = self.inner.lock().expect("rng journal mutex poisoned");
        self.sweep(&mut inner, committed_at);
        if let Some(existing) = inner.commits.get(day_utc) {
            return Ok(existing.clone());
        }
        let state = RngCommitState::Pending {
            day_utc: day_utc.to_string(),
            server_seed_hash: server_seed_hash.to_string(),
            committed_at,
        };
        inner.commits.insert(day_utc.to_string(), state.clone());
        Ok(state)
    }

    async fn get_commit(&self, day_utc: &str) -> Result<Option<RngCommitState>, JournalError> {
        let inner = self.inner.lock().expect("rng journal mutex poisoned");
        Ok(inner.commits.get(day_utc).cloned())
    }

    async fn reveal_commit(
        &self,
        day_utc: &str,
        server_seed: &str,
        revealed_at: Timestamp,
    ) -> Result<RngCommitState, JournalError> {
        let mut inner = self.inner.lock().expect("rng journal mutex poisoned");
        let existing = inner
            .commits
            .get(day_utc)
            .cloned()
            .ok_or_else(|| JournalError::Storage(format!("no commit for day {day_utc}")))?;
        let revealed = match existing {
            RngCommitState::Revealed { .. } => existing,
            RngCommitState::Pending { day_utc, server_seed_hash, committed_at } => RngCommitState::Revealed {
                day_utc,
                server_seed_hash,
                committed_at,
                server_seed: server_seed.to_string(),
                revealed_at,
            },
        };
        inner.commits.insert(day_utc.to_string(), revealed.clone());
        Ok(revealed)
    }

    async fn get_draw(&self, key: DrawKey<'_>) -> Result<Option<RngDrawRecord>, JournalError> {
        let inner = self.inner.lock().expect("rng journal mutex poisoned");
        Ok(inner
            .draws
            .get(&(key.case_id.to_string(), key.user_id, key.nonce.to_string()))
            .cloned())
    }

    async fn insert_draw_if_absent(&self, record: RngDrawRecord) -> Result<(RngDrawRecord, bool), JournalError> {
        let mut inner = self.inner.lock().expect("rng journal mutex poisoned");
        self.sweep(&mut inner, record.created_at);
        let key = (record.case_id.clone(), record.user_id, record.nonce.clone());
        if let Some(existing) = inner.draws.get(&key) {
            return Ok((existing.clone(), false));
        }
        inner.draws.insert(key, record.clone());
        Ok((record, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_commit_is_idempotent() {
        let journal = InMemoryRngJournal::new();
        let a = journal.upsert_commit("2026-07-26", "hash1", 1000).await.unwrap();
        let b = journal.upsert_commit("2026-07-26", "hash2", 2000).await.unwrap();
        assert_eq!(a.server_seed_hash(), b.server_seed_hash());
        assert_eq!(b.server_seed_hash(), "hash1");
    }

    #[tokio::test]
    async fn draw_insert_if_absent_returns_existing() {
        let journal = InMemoryRngJournal::new();
        let rec = RngDrawRecord {
            case_id: "c1".into(),
            user_id: 42,
            nonce: "n1".into(),
            server_seed_hash: "h".into(),
            roll_hex: "ab".into(),
            ppm: 500_000,
            result_item_id: Some("p1".into()),
            created_at: 100,
        };
        let (first, inserted1) = journal.insert_draw_if_absent(rec.clone()).await.unwrap();
        assert!(inserted1);
        let mut dup = rec.clone();
        dup.ppm = 1; // should be ignored — idempotent on key
        let (second, inserted2) = journal.insert_draw_if_absent(dup).await.unwrap();
        assert!(!inserted2);
        assert_eq!(first.ppm, second.ppm);
    }

    #[tokio::test]
    async fn reveal_requires_prior_commit() {
        let journal = InMemoryRngJournal::new();
        assert!(journal.reveal_commit("2026-01-01", "seed", 1).await.is_err());
    }
}
