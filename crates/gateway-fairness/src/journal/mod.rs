pub mod backend;
pub mod file;
pub mod memory;
#[cfg(feature = "sql")]
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gateway_core::{Timestamp, UserId};

/// UTC calendar day in ISO-8601 form (`YYYY-MM-DD`), used as the commit key.
pub type DayUtc = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum RngCommitState {
    Pending {
        #[serde(rename = "dayUtc")]
        day_utc: DayUtc,
        #[serde(rename = "serverSeedHash")]
        server_seed_hash: String,
        #[serde(rename = "committedAt")]
        committed_at: Timestamp,
    },
    Revealed {
        #[serde(rename = "dayUtc")]
        day_utc: DayUtc,
        #[serde(rename = "serverSeedHash")]
        server_seed_hash: String,
        #[serde(rename = "committedAt")]
        committed_at: Timestamp,
        #[serde(rename = "serverSeed")]
        server_seed: String,
        #[serde(rename = "revealedAt")]
        revealed_at: Timestamp,
    },
}

impl RngCommitState {
    pub fn day_utc(&self) -> &str {
        match self {
            RngCommitState::Pending { day_utc, .. } => day_utc,
            RngCommitState::Revealed { day_utc, .. } => day_utc,
        }
    }

    pub fn server_seed_hash(&self) -> &str {
        match self {
            RngCommitState::Pending { server_seed_hash, .. } => server_seed_hash,
            RngCommitState::Revealed { server_seed_hash, .. } => server_seed_hash,
        }
    }

    pub fn committed_at(&self) -> Timestamp {
        match self {
            RngCommitState::Pending { committed_at, .. } => *committed_at,
            RngCommitState::Revealed { committed_at, .. } => *committed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngDrawRecord {
    #[serde(rename = "caseId")]
    pub case_id: String,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub nonce: String,
    #[serde(rename = "serverSeedHash")]
    pub server_seed_hash: String,
    #[serde(rename = "rollHex")]
    pub roll_hex: String,
    pub ppm: u32,
    #[serde(rename = "resultItemId")]
    pub result_item_id: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawKey<'a> {
    pub case_id: &'a str,
    pub user_id: UserId,
    pub nonce: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Pluggable persistence for RNG commit/draw state (component F). All
/// mutating methods are idempotent per their key, matching the commit-reveal
/// and draw invariants in `engine.rs`.
#[async_trait]
pub trait RngJournal: Send + Sync {
    /// Insert `(day, hash)` if absent; if present, return the existing state
    /// unchanged. Callers are responsible for verifying hash equality.
    async fn upsert_commit(&self, day_utc: &str, server_seed_hash: &str, committed_at: Timestamp)
        -> Result<RngCommitState, JournalError>;

    async fn get_commit(&self, day_utc: &str) -> Result<Option<RngCommitState>, JournalError>;

    /// Transition `Pending -> Revealed`. No-ops (returns the existing state)
    /// if already revealed.
    async fn reveal_commit(
        &self,
        day_utc: &str,
        server_seed: &str,
        revealed_at: Timestamp,
    ) -> Result<RngCommitState, JournalError>;

    async fn get_draw(&self, key: DrawKey<'_>) -> Result<Option<RngDrawRecord>, JournalError>;

    /// Insert the draw if absent; if present, return the existing record
    /// unchanged (this is how §4.E draw idempotency is implemented).
    async fn insert_draw_if_absent(&self, record: RngDrawRecord) -> Result<(RngDrawRecord, bool), JournalError>;
}
