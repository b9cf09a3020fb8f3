//! Commit-reveal fairness engine (component E). One server seed is
//! committed per UTC day; individual draws derive a deterministic roll from
//! that seed plus the caller's `(userId, nonce, caseId)` triple, so any past
//! draw can be independently re-derived and checked once the day is
//! revealed.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{NaiveDate, TimeZone, Utc};
use gateway_core::{CaseConfig, Timestamp, UserId};
use gateway_crypto::{hmac_sha256, sha256, to_hex};
use tracing::{debug, info};

use crate::journal::{DayUtc, DrawKey, JournalError, RngCommitState, RngDrawRecord, RngJournal};

#[derive(Debug, thiserror::Error)]
pub enum FairnessError {
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("reveal requested for a day that has not yet rolled over: {0}")]
    DayNotElapsed(String),
    #[error("committed hash does not match the recomputed hash for day {0}")]
    HashMismatch(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    CommitMissing,
    InvalidServerSeed,
    ServerSeedMismatch,
    Success(VerifyResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    pub ppm: u32,
    pub roll_hex: String,
    pub server_seed_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawReceipt {
    pub day_utc: DayUtc,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub roll_hex: String,
    pub ppm: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawOutcome {
    pub record: RngDrawRecord,
    pub receipt: DrawReceipt,
    pub was_idempotent: bool,
}

#[derive(Default)]
pub struct FairnessMetrics {
    pub draw_total: AtomicU64,
    pub draw_idempotent_total: AtomicU64,
}

/// Commit-reveal RNG service, backed by a pluggable [`RngJournal`].
pub struct RngService<J: RngJournal> {
    journal: J,
    fairness_key: Vec<u8>,
    pub metrics: FairnessMetrics,
}

impl<J: RngJournal> RngService<J> {
    pub fn new(journal: J, fairness_key: Vec<u8>) -> Self {
        Self { journal, fairness_key, metrics: FairnessMetrics::default() }
    }

    /// `serverSeed(key, day) = HMAC-SHA256(key, utf8(iso(day)))`.
    fn server_seed(&self, day_utc: &str) -> [u8; 32] {
        hmac_sha256(&self.fairness_key, day_utc.as_bytes())
    }

    /// `serverSeedHash(key, day) = toHex(SHA-256(serverSeed(key, day)))`.
    fn server_seed_hash(&self, day_utc: &str) -> String {
        to_hex(&sha256(&self.server_seed(day_utc)))
    }

    /// Ensure today's commit exists, creating it if necessary. Idempotent —
    /// a second call on the same day returns the already-committed hash.
    pub async fn ensure_today_commit(&self, now: Timestamp) -> Result<RngCommitState, FairnessError> {
        let day = today_utc(now);
        let hash = self.server_seed_hash(&day);
        let state = self.journal.upsert_commit(&day, &hash, now).await?;
        if state.server_seed_hash() != hash {
            return Err(FairnessError::HashMismatch(day));
        }
        info!(day_utc = %day, "rng commit ensured");
        Ok(state)
    }

    /// Look up a day's commit without mutating it. Used by read-only
    /// surfaces that need to tell "no commit yet" apart from other failures.
    pub async fn get_commit(&self, day_utc: &str) -> Result<Option<RngCommitState>, FairnessError> {
        Ok(self.journal.get_commit(day_utc).await?)
    }

    /// Reveal a past day's commit. Requires `day < today`.
    pub async fn reveal(&self, day_utc: &str, now: Timestamp) -> Result<RngCommitState, FairnessError> {
        if day_utc >= today_utc(now).as_str() {
            return Err(FairnessError::DayNotElapsed(day_utc.to_string()));
        }
        let existing = self
            .journal
            .get_commit(day_utc)
            .await?
            .ok_or_else(|| FairnessError::HashMismatch(day_utc.to_string()))?;

        let expected_hash = self.server_seed_hash(day_utc);
        if existing.server_seed_hash() != expected_hash {
            return Err(FairnessError::HashMismatch(day_utc.to_string()));
        }

        let seed_hex = to_hex(&self.server_seed(day_utc));
        let revealed = self.journal.reveal_commit(day_utc, &seed_hex, now).await?;
        info!(day_utc, "rng commit revealed");
        Ok(revealed)
    }

    /// Idempotent prize draw for `(caseId, userId, nonce)`. Resolves the
    /// prize item by a cumulative-probability walk over `case.items` in
    /// declared order.
    pub async fn draw(
        &self,
        case: &CaseConfig,
        user_id: UserId,
        nonce: &str,
        now: Timestamp,
    ) -> Result<DrawOutcome, FairnessError> {
        let day = today_utc(now);
        let hash = self.server_seed_hash(&day);
        self.journal.upsert_commit(&day, &hash, now).await?;

        let roll = hmac_sha256(&self.server_seed(&day), client_seed(user_id, nonce, &case.id).as_bytes());
        let roll_hex = to_hex(&roll);
        let ppm = ppm_from_roll(&roll);
        let result_item_id = resolve_prize(case, ppm);

        let record = RngDrawRecord {
            case_id: case.id.clone(),
            user_id,
            nonce: nonce.to_string(),
            server_seed_hash: hash.clone(),
            roll_hex: roll_hex.clone(),
            ppm,
            result_item_id,
            created_at: now,
        };

        let (stored, inserted) = self.journal.insert_draw_if_absent(record).await?;
        self.metrics.draw_total.fetch_add(1, Ordering::Relaxed);
        if !inserted {
            self.metrics.draw_idempotent_total.fetch_add(1, Ordering::Relaxed);
            debug!(case_id = %case.id, user_id, nonce, "rng draw idempotent replay");
        }

        let receipt = DrawReceipt {
            day_utc: day,
            server_seed_hash: stored.server_seed_hash.clone(),
            client_seed: client_seed(user_id, nonce, &case.id),
            roll_hex: stored.roll_hex.clone(),
            ppm: stored.ppm,
        };

        Ok(DrawOutcome { record: stored, receipt, was_idempotent: !inserted })
    }

    /// Re-derive a past draw from a candidate revealed `serverSeed` and
    /// check it against the committed hash and, if a draw is on record,
    /// against the stored roll.
    pub async fn verify(
        &self,
        day_utc: &str,
        candidate_server_seed_hex: &str,
        user_id: UserId,
        nonce: &str,
        case_id: &str,
    ) -> Result<VerifyOutcome, FairnessError> {
        let Some(commit) = self.journal.get_commit(day_utc).await? else {
            return Ok(VerifyOutcome::CommitMissing);
        };

        let Ok(candidate_bytes) = gateway_crypto::from_hex(candidate_server_seed_hex) else {
            return Ok(VerifyOutcome::InvalidServerSeed);
        };

        let candidate_hash = to_hex(&sha256(&candidate_bytes));
        if candidate_hash != commit.server_seed_hash() {
            return Ok(VerifyOutcome::ServerSeedMismatch);
        }

        let roll = hmac_sha256(&candidate_bytes, client_seed(user_id, nonce, case_id).as_bytes());
        let roll_hex = to_hex(&roll);
        let ppm = ppm_from_roll(&roll);

        Ok(VerifyOutcome::Success(VerifyResult {
            ppm,
            roll_hex,
            server_seed_hash: commit.server_seed_hash().to_string(),
        }))
    }
}

/// `clientSeed(userId, nonce, caseId) = "<userId>|<nonce>|<caseId>|v1"`.
fn client_seed(user_id: UserId, nonce: &str, case_id: &str) -> String {
    format!("{user_id}|{nonce}|{case_id}|v1")
}

/// `ppm = (bigUnsignedBE(rollBytes[0..8]) × 1_000_000) / 2^64`, computed
/// with a widening 128-bit multiply so the result never truncates (see
/// Design Notes — fairness numerics).
fn ppm_from_roll(roll: &[u8; 32]) -> u32 {
    let mut first8 = [0u8; 8];
    first8.copy_from_slice(&roll[0..8]);
    let value = u64::from_be_bytes(first8);
    let ppm = (value as u128 * 1_000_000u128) >> 64;
    ppm as u32
}

/// Cumulative-probability walk: the first item whose cumulative probability
/// exceeds `ppm` wins. Returns `None` if the declared probabilities sum to
/// less than 1_000_000 and `ppm` overflows past the end (see Open Questions
/// — tolerated, not rejected).
fn resolve_prize(case: &CaseConfig, ppm: u32) -> Option<String> {
    let mut cumulative: u64 = 0;
    for item in &case.items {
        cumulative += item.probability_ppm;
        if cumulative > ppm as u64 {
            return Some(item.id.clone());
        }
    }
    None
}

fn today_utc(now: Timestamp) -> DayUtc {
    Utc.timestamp_opt(now, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is a valid timestamp"))
        .date_naive()
        .format("%Y-%m-%d")
        .to_string()
}

pub fn naive_date(day_utc: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(day_utc, "%Y-%m-%d").ok()
}
