//! Prize delivery and refund issuance — the two services the
//! successful-payment handler (N) invokes after a fairness draw.

pub mod award;
pub mod refund;

pub use award::{AwardError, AwardJournalEntry, AwardMetrics, AwardPlan, AwardService};
pub use refund::{RefundError, RefundJournalEntry, RefundMetrics, RefundReason, RefundService};
