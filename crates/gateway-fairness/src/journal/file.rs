use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use gateway_core::Timestamp;

use super::{DrawKey, JournalError, RngCommitState, RngDrawRecord, RngJournal};

const DEFAULT_TTL_SECS: i64 = 30 * 24 * 3600;
const COMMITS_FILE: &str = "rng_commits.json";
const DRAWS_FILE: &str = "rng_draws.ndjson";

struct Inner {
    commits: Vec<RngCommitState>,
    draws: Vec<RngDrawRecord>,
}

/// File-backed RNG journal: commits are kept as a JSON array snapshot
/// written atomically (tmp file + rename) on every change; draws are
/// appended one JSON line at a time to an append-only ndjson file. File
/// writes are synchronous, matching the spec's durability requirement —
/// a reader never observes a partially-written commits snapshot.
pub struct FileRngJournal {
    data_dir: PathBuf,
    inner: Mutex<Inner>,
    ttl_secs: i64,
}

impl FileRngJournal {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, JournalError> {
        Self::open_with_ttl(data_dir, DEFAULT_TTL_SECS)
    }

    pub fn open_with_ttl(data_dir: impl Into<PathBuf>, ttl_secs: i64) -> Result<Self, JournalError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|e| JournalError::Storage(e.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        let mut commits = load_commits(&data_dir.join(COMMITS_FILE))?;
        commits.retain(|c| now - c.committed_at() < ttl_secs);
        let mut draws = load_draws(&data_dir.join(DRAWS_FILE))?;
        draws.retain(|d| now - d.created_at < ttl_secs);

        Ok(Self { data_dir, inner: Mutex::new(Inner { commits, draws }), ttl_secs })
    }

    fn write_commits_snapshot(&self, commits: &[RngCommitState]) -> Result<(), JournalError> {
        let json = serde_json::to_vec_pretty(commits).map_err(|e| JournalError::Serialization(e.to_string()))?;
        atomic_write(&self.data_dir.join(COMMITS_FILE), &json)
    }

    fn append_draw_line(&self, record: &RngDrawRecord) -> Result<(), JournalError> {
        let line = serde_json::to_string(record).map_err(|e| JournalError::Serialization(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_dir.join(DRAWS_FILE))
            .map_err(|e| JournalError::Storage(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| JournalError::Storage(e.to_string()))?;
        file.sync_data().map_err(|e| JournalError::Storage(e.to_string()))?;
        Ok(())
    }
}

fn load_commits(path: &Path) -> Result<Vec<RngCommitState>, JournalError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path).map_err(|e| JournalError::Storage(e.to_string()))?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&bytes).map_err(|e| JournalError::Serialization(e.to_string()))
}

fn load_draws(path: &Path) -> Result<Vec<RngDrawRecord>, JournalError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| JournalError::Storage(e.to_string()))?;
    let mut draws = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| JournalError::Storage(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => draws.push(record),
            Err(e) => warn!(lineno, error = %e, "skipping malformed draw record line"),
        }
    }
    Ok(draws)
}

/// Write to a temp file in the same directory and rename over the target.
/// `rename` is atomic on the same filesystem on the platforms this targets;
/// a platform lacking atomic rename would need a non-atomic fallback here,
/// documented as a weaker crash guarantee (see Design Notes).
fn atomic_write(target: &Path, bytes: &[u8]) -> Result<(), JournalError> {
    let tmp_path = target.with_extension("tmp");
    {
        let mut tmp = File::create(&tmp_path).map_err(|e| JournalError::Storage(e.to_string()))?;
        tmp.write_all(bytes).map_err(|e| JournalError::Storage(e.to_string()))?;
        tmp.sync_all().map_err(|e| JournalError::Storage(e.to_string()))?;
    }
    fs::rename(&tmp_path, target).map_err(|e| JournalError::Storage(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl RngJournal for FileRngJournal {
    async fn upsert_commit(
        &self,
        day_utc: &str,
        server_seed_hash: &str,
        committed_at: Timestamp,
    ) -> Result<RngCommitState, JournalError> {
        let mut inner = self.inner.lock().expect("rng file journal mutex poisoned");
        inner.commits.retain(|c| committed_at - c.committed_at() < self.ttl_secs || c.day_utc() == day_utc);
        if let Some(existing) = inner.commits.iter().find(|c| c.day_utc() == day_utc) {
            return Ok(existing.clone());
        }
        let state = RngCommitState::Pending {
            day_utc: day_utc.to_string(),
            server_seed_hash: server_seed_hash.to_string(),
            committed_at,
        };
        inner.commits.push(state.clone());
        self.write_commits_snapshot(&inner.commits)?;
        Ok(state)
    }

    async fn get_commit(&self, day_utc: &str) -> Result<Option<RngCommitState>, JournalError> {
        let inner = self.inner.lock().expect("rng file journal mutex poisoned");
        Ok(inner.commits.iter().find(|c| c.day_utc() == day_utc).cloned())
    }

    async fn reveal_commit(
        &self,
        day_utc: &str,
        server_seed: &str,
        revealed_at: Timestamp,
    ) -> Result<RngCommitState, JournalError> {
        let mut inner = self.inner.lock().expect("rng file journal mutex poisoned");
        let idx = inner
            .commits
            .iter()
            .position(|c| c.day_utc() == day_utc)
            .ok_or_else(|| JournalError::Storage(format!("no commit for day {day_utc}")))?;
        let revealed = match inner.commits[idx].clone() {
            RngCommitState::Revealed { .. } => inner.commits[idx].clone(),
            RngCommitState::Pending { day_utc, server_seed_hash, committed_at } => RngCommitState::Revealed {
                day_utc,
                server_seed_hash,
                committed_at,
                server_seed: server_seed.to_string(),
                revealed_at,
            },
        };
        inner.commits[idx] = revealed.clone();
        self.write_commits_snapshot(&inner.commits)?;
        Ok(revealed)
    }

    async fn get_draw(&self, key: DrawKey<'_>) -> Result<Option<RngDrawRecord>, JournalError> {
        let inner = self.inner.lock().expect("rng file journal mutex poisoned");
        Ok(inner
            .draws
            .iter()
            .find(|d| d.case_id == key.case_id && d.user_id == key.user_id && d.nonce == key.nonce)
            .cloned())
    }

    async fn insert_draw_if_absent(&self, record: RngDrawRecord) -> Result<(RngDrawRecord, bool), JournalError> {
        let mut inner = self.inner.lock().expect("rng file journal mutex poisoned");
        if let Some(existing) = inner
            .draws
            .iter()
            .find(|d| d.case_id == record.case_id && d.user_id == record.user_id && d.nonce == record.nonce)
        {
            return Ok((existing.clone(), false));
        }
        self.append_draw_line(&record)?;
        inner.draws.push(record.clone());
        Ok((record, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commits_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let journal = FileRngJournal::open(dir.path()).unwrap();
            journal.upsert_commit("2026-07-26", "hash1", 1000).await.unwrap();
        }
        let reopened = FileRngJournal::open(dir.path()).unwrap();
        let commit = reopened.get_commit("2026-07-26").await.unwrap().unwrap();
        assert_eq!(commit.server_seed_hash(), "hash1");
    }

    #[tokio::test]
    async fn draws_append_and_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let record = RngDrawRecord {
            case_id: "c1".into(),
            user_id: 1,
            nonce: "n".into(),
            server_seed_hash: "h".into(),
            roll_hex: "ab".into(),
            ppm: 1,
            result_item_id: None,
            created_at: 1,
        };
        {
            let journal = FileRngJournal::open(dir.path()).unwrap();
            journal.insert_draw_if_absent(record.clone()).await.unwrap();
        }
        let reopened = FileRngJournal::open(dir.path()).unwrap();
        let key = DrawKey { case_id: "c1", user_id: 1, nonce: "n" };
        assert!(reopened.get_draw(key).await.unwrap().is_some());
    }
}
