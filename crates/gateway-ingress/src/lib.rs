//! Update ingestion: parsing, deduplication, bounded dispatch, the outbound
//! platform client, and the long-polling alternative to the webhook front
//! door (components G, H, J, K).

pub mod dedup;
pub mod dispatcher;
pub mod long_polling;
pub mod platform_client;
pub mod retry;
pub mod update;

use std::time::{SystemTime, UNIX_EPOCH};

use gateway_core::TimestampMs;

/// Milliseconds since the Unix epoch, used for dedup bookkeeping and the
/// dispatcher's background sweeper.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as TimestampMs
}
