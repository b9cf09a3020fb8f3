//! ─── Gateway tunables ───────────────────────────────────────────────────────
//!
//! Defaults for every numeric knob named in the spec's configuration and
//! concurrency sections. All of these are overridable via `gateway-config`;
//! these are the fallback values used when neither env nor file set them.

// ── Dedup / dispatcher ───────────────────────────────────────────────────────

/// Default dedup TTL for seen update ids (hours).
pub const DEDUP_TTL_HOURS: i64 = 26;

/// Default dispatcher queue capacity.
pub const DISPATCHER_QUEUE_CAPACITY: usize = 10_000;

/// Default dispatcher worker count.
pub const DISPATCHER_WORKERS: usize = 1;

/// Background sweeper interval for the dedup seen-set (minutes).
pub const DEDUP_SWEEP_INTERVAL_MINS: u64 = 15;

/// Maximum webhook body size (bytes).
pub const WEBHOOK_MAX_BODY_BYTES: usize = 1024 * 1024;

// ── Timeouts / deadlines ─────────────────────────────────────────────────────

/// Pre-checkout answer deadline (seconds).
pub const PRE_CHECKOUT_DEADLINE_SECS: u64 = 10;

/// Refund SLA — warn if a refund takes longer than this (seconds).
pub const REFUND_SLA_SECS: u64 = 2;

/// Platform HTTP client request timeout (seconds).
pub const PLATFORM_CLIENT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Platform HTTP client connect timeout (seconds).
pub const PLATFORM_CLIENT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Long-polling `getUpdates` timeout bounds (seconds).
pub const LONG_POLL_TIMEOUT_MIN_SECS: u64 = 1;
pub const LONG_POLL_TIMEOUT_MAX_SECS: u64 = 50;
pub const LONG_POLL_DEFAULT_TIMEOUT_SECS: u64 = 30;

// ── Retry / backoff ──────────────────────────────────────────────────────────

/// Maximum attempts for retryable platform calls.
pub const RETRY_MAX_ATTEMPTS: u32 = 4;

/// Initial backoff delay (ms).
pub const RETRY_BASE_DELAY_MS: u64 = 200;

/// Maximum backoff delay (ms).
pub const RETRY_MAX_DELAY_MS: u64 = 1_600;

/// Jitter fraction applied to each backoff delay (±10%).
pub const RETRY_JITTER_FRACTION: f64 = 0.10;

// ── RNG / fairness ───────────────────────────────────────────────────────────

/// Default TTL for in-memory RNG journal entries (days).
pub const RNG_JOURNAL_TTL_DAYS: i64 = 30;

/// Acceptable `FAIRNESS_KEY` byte lengths when hex/base64-decoded.
pub const FAIRNESS_KEY_MIN_BYTES: usize = 32;
pub const FAIRNESS_KEY_MAX_BYTES: usize = 64;

// ── Award service ────────────────────────────────────────────────────────────

/// Gift catalog cache TTL (seconds).
pub const GIFT_CACHE_TTL_SECS: u64 = 300;

/// Valid Telegram Premium subscription star costs by tier (months, starCost).
pub const PREMIUM_TIER_STAR_COSTS: [(u8, i64); 3] = [(3, 1_000), (6, 1_500), (12, 2_500)];

// ── Misc ─────────────────────────────────────────────────────────────────────

/// The only currency this gateway accepts.
pub const REQUIRED_CURRENCY: &str = "XTR";

/// Pre-checkout / successful-payment user-visible rejection message. Never
/// replaced with the precise internal reason.
pub const PAYMENT_REJECTED_MESSAGE: &str = "Payment rejected: invalid parameters.";
