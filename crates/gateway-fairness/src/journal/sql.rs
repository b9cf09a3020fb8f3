//! SQL-backed RNG journal (component F, SQL variant). Targets SQLite via
//! `sqlx`; the schema and `ON CONFLICT DO NOTHING` idempotency strategy are
//! equally valid against Postgres (see §6 Persisted state layouts).

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use gateway_core::Timestamp;

use super::{DrawKey, JournalError, RngCommitState, RngDrawRecord, RngJournal};

pub struct SqlRngJournal {
    pool: SqlitePool,
}

impl SqlRngJournal {
    pub async fn connect(url: &str) -> Result<Self, JournalError> {
        let pool = SqlitePool::connect(url).await.map_err(|e| JournalError::Storage(e.to_string()))?;
        let journal = Self { pool };
        journal.migrate().await?;
        Ok(journal)
    }

    async fn migrate(&self) -> Result<(), JournalError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rng_seed_commits (
                day_utc TEXT PRIMARY KEY,
                server_seed_hash TEXT NOT NULL,
                committed_at INTEGER NOT NULL,
                revealed_at INTEGER,
                server_seed TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| JournalError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rng_draws (
                case_id TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                nonce TEXT NOT NULL,
                server_seed_hash TEXT NOT NULL,
                roll_hex TEXT NOT NULL,
                ppm INTEGER NOT NULL,
                result_item_id TEXT,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (case_id, user_id, nonce)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| JournalError::Storage(e.to_string()))?;

        Ok(())
    }

    fn row_to_commit(row: &sqlx::sqlite::SqliteRow) -> RngCommitState {
        let day_utc: String = row.get("day_utc");
        let server_seed_hash: String = row.get("server_seed_hash");
        let committed_at: i64 = row.get("committed_at");
        let revealed_at: Option<i64> = row.get("revealed_at");
        let server_seed: Option<String> = row.get("server_seed");
        match (revealed_at, server_seed) {
            (Some(revealed_at), Some(server_seed)) => RngCommitState::Revealed {
                day_utc,
                server_seed_hash,
                committed_at,
                server_seed,
                revealed_at,
            },
            _ => RngCommitState::Pending { day_utc, server_seed_hash, committed_at },
        }
    }

    fn row_to_draw(row: &sqlx::sqlite::SqliteRow) -> RngDrawRecord {
        RngDrawRecord {
            case_id: row.get("case_id"),
            user_id: row.get("user_id"),
            nonce: row.get("nonce"),
            server_seed_hash: row.get("server_seed_hash"),
            roll_hex: row.get("roll_hex"),
            ppm: row.get::<i64, _>("ppm") as u32,
            result_item_id: row.get("result_item_id"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl RngJournal for SqlRngJournal {
    async fn upsert_commit(
        &self,
        day_utc: &str,
        server_seed_hash: &str,
        committed_at: Timestamp,
    ) -> Result<RngCommitState, JournalError> {
        sqlx::query(
            "INSERT INTO rng_seed_commits (day_utc, server_seed_hash, committed_at)
             VALUES (?, ?, ?) ON CONFLICT(day_utc) DO NOTHING",
        )
        .bind(day_utc)
        .bind(server_seed_hash)
        .bind(committed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| JournalError::Storage(e.to_string()))?;

        self.get_commit(day_utc)
            .await?
            .ok_or_else(|| JournalError::Storage("commit vanished after upsert".into()))
    }

    async fn get_commit(&self, day_utc: &str) -> Result<Option<RngCommitState>, JournalError> {
        let row = sqlx::query("SELECT * FROM rng_seed_commits WHERE day_utc = ?")
            .bind(day_utc)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| JournalError::Storage(e.to_string()))?;
        Ok(row.as_ref().map(Self::row_to_commit))
    }

    async fn reveal_commit(
        &self,
        day_utc: &str,
        server_seed: &str,
        revealed_at: Timestamp,
    ) -> Result<RngCommitState, JournalError> {
        // Conditional UPDATE — only transitions a commit that hasn't been
        // revealed yet (`server_seed IS NULL`), matching §4.F.
        sqlx::query(
            "UPDATE rng_seed_commits SET server_seed = ?, revealed_at = ?
             WHERE day_utc = ? AND server_seed IS NULL",
        )
        .bind(server_seed)
        .bind(revealed_at)
        .bind(day_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| JournalError::Storage(e.to_string()))?;

        self.get_commit(day_utc)
            .await?
            .ok_or_else(|| JournalError::Storage(format!("no commit for day {day_utc}")))
    }

    async fn get_draw(&self, key: DrawKey<'_>) -> Result<Option<RngDrawRecord>, JournalError> {
        let row = sqlx::query("SELECT * FROM rng_draws WHERE case_id = ? AND user_id = ? AND nonce = ?")
            .bind(key.case_id)
            .bind(key.user_id)
            .bind(key.nonce)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| JournalError::Storage(e.to_string()))?;
        Ok(row.as_ref().map(Self::row_to_draw))
    }

    async fn insert_draw_if_absent(&self, record: RngDrawRecord) -> Result<(RngDrawRecord, bool), JournalError> {
        let result = sqlx::query(
            "INSERT INTO rng_draws (case_id, user_id, nonce, server_seed_hash, roll_hex, ppm, result_item_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT(case_id, user_id, nonce) DO NOTHING",
        )
        .bind(&record.case_id)
        .bind(record.user_id)
        .bind(&record.nonce)
        .bind(&record.server_seed_hash)
        .bind(&record.roll_hex)
        .bind(record.ppm as i64)
        .bind(&record.result_item_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| JournalError::Storage(e.to_string()))?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            return Ok((record, true));
        }
        let key = DrawKey { case_id: &record.case_id, user_id: record.user_id, nonce: &record.nonce };
        let existing = self
            .get_draw(key)
            .await?
            .ok_or_else(|| JournalError::Storage("draw vanished after conflicting insert".into()))?;
        Ok((existing, false))
    }
}
