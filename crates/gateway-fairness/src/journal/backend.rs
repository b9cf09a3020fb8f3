//! Runtime-selected journal backend (component F). Wiring picks exactly one
//! of these per process, named by `RNG_STORAGE`; wrapping them in one enum
//! lets everything above this crate hold a single concrete `RngJournal`
//! type regardless of which storage was configured.

use async_trait::async_trait;

use gateway_core::Timestamp;

use super::file::FileRngJournal;
use super::memory::InMemoryRngJournal;
#[cfg(feature = "sql")]
use super::sql::SqlRngJournal;
use super::{DrawKey, JournalError, RngCommitState, RngDrawRecord, RngJournal};

pub enum RngJournalBackend {
    Memory(InMemoryRngJournal),
    File(FileRngJournal),
    #[cfg(feature = "sql")]
    Sql(SqlRngJournal),
}

#[async_trait]
impl RngJournal for RngJournalBackend {
    async fn upsert_commit(
        &self,
        day_utc: &str,
        server_seed_hash: &str,
        committed_at: Timestamp,
    ) -> Result<RngCommitState, JournalError> {
        match self {
            Self::Memory(j) => j.upsert_commit(day_utc, server_seed_hash, committed_at).await,
            Self::File(j) => j.upsert_commit(day_utc, server_seed_hash, committed_at).await,
            #[cfg(feature = "sql")]
            Self::Sql(j) => j.upsert_commit(day_utc, server_seed_hash, committed_at).await,
        }
    }

    async fn get_commit(&self, day_utc: &str) -> Result<Option<RngCommitState>, JournalError> {
        match self {
            Self::Memory(j) => j.get_commit(day_utc).await,
            Self::File(j) => j.get_commit(day_utc).await,
            #[cfg(feature = "sql")]
            Self::Sql(j) => j.get_commit(day_utc).await,
        }
    }

    async fn reveal_commit(
        &self,
        day_utc: &str,
        server_seed: &str,
        revealed_at: Timestamp,
    ) -> Result<RngCommitState, JournalError> {
        match self {
            Self::Memory(j) => j.reveal_commit(day_utc, server_seed, revealed_at).await,
            Self::File(j) => j.reveal_commit(day_utc, server_seed, revealed_at).await,
            #[cfg(feature = "sql")]
            Self::Sql(j) => j.reveal_commit(day_utc, server_seed, revealed_at).await,
        }
    }

    async fn get_draw(&self, key: DrawKey<'_>) -> Result<Option<RngDrawRecord>, JournalError> {
        match self {
            Self::Memory(j) => j.get_draw(key).await,
            Self::File(j) => j.get_draw(key).await,
            #[cfg(feature = "sql")]
            Self::Sql(j) => j.get_draw(key).await,
        }
    }

    async fn insert_draw_if_absent(&self, record: RngDrawRecord) -> Result<(RngDrawRecord, bool), JournalError> {
        match self {
            Self::Memory(j) => j.insert_draw_if_absent(record).await,
            Self::File(j) => j.insert_draw_if_absent(record).await,
            #[cfg(feature = "sql")]
            Self::Sql(j) => j.insert_draw_if_absent(record).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_variant_delegates() {
        let backend = RngJournalBackend::Memory(InMemoryRngJournal::new());
        let commit = backend.upsert_commit("2026-07-26", "hash", 1000).await.unwrap();
        assert_eq!(commit.server_seed_hash(), "hash");
    }
}
