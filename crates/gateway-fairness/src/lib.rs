pub mod engine;
pub mod journal;

pub use engine::{DrawOutcome, DrawReceipt, FairnessError, FairnessMetrics, RngService, VerifyOutcome, VerifyResult};
pub use journal::{DayUtc, DrawKey, JournalError, RngCommitState, RngDrawRecord, RngJournal};
pub use journal::backend::RngJournalBackend;
pub use journal::file::FileRngJournal;
pub use journal::memory::InMemoryRngJournal;
#[cfg(feature = "sql")]
pub use journal::sql::SqlRngJournal;
