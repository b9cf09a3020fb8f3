use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram user id / "subject" identifier.
pub type UserId = i64;

/// Unix timestamp, seconds, UTC.
pub type Timestamp = i64;

/// Unix timestamp, milliseconds, UTC.
pub type TimestampMs = i64;

// ── BucketKey ────────────────────────────────────────────────────────────────

/// Identifies the subject of a rate limit or velocity check: either the
/// source IP or an authenticated subject (end-user).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketKey {
    Ip(String),
    Subject(UserId),
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Ip(ip) => write!(f, "ip:{ip}"),
            BucketKey::Subject(id) => write!(f, "subject:{id}"),
        }
    }
}

impl fmt::Debug for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketKey({self})")
    }
}

// ── ChargeId ─────────────────────────────────────────────────────────────────

/// Platform-issued unique identifier for a single completed payment.
/// The primary idempotency key for award/refund handling.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChargeId(pub String);

impl ChargeId {
    /// Build from raw provider text, trimming surrounding whitespace.
    /// Returns `None` if the trimmed id is empty.
    pub fn from_raw(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChargeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ChargeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChargeId({})", self.0)
    }
}

// ── PaymentPayload ───────────────────────────────────────────────────────────

/// Round-tripped through `invoice_payload` on the platform's invoice object.
/// Invariant enforced by the caller: UTF-8-encoded JSON must be ≤ 128 bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPayload {
    #[serde(rename = "caseId")]
    pub case_id: String,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub nonce: String,
    pub ts: Timestamp,
}

impl PaymentPayload {
    pub const MAX_ENCODED_BYTES: usize = 128;

    pub fn new(case_id: impl Into<String>, user_id: UserId, nonce: impl Into<String>, ts: Timestamp) -> Self {
        Self {
            case_id: case_id.into(),
            user_id,
            nonce: nonce.into(),
            ts,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

// ── Case catalog (external; one static reference implementation here) ────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrizeKind {
    Gift,
    Premium3m,
    Premium6m,
    Premium12m,
    Internal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: PrizeKind,
    #[serde(rename = "starCost", skip_serializing_if = "Option::is_none")]
    pub star_cost: Option<i64>,
    #[serde(rename = "probabilityPpm")]
    pub probability_ppm: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseConfig {
    pub id: String,
    pub title: String,
    #[serde(rename = "priceStars")]
    pub price_stars: i64,
    pub items: Vec<PrizeItem>,
}

impl CaseConfig {
    /// Sum of `probabilityPpm` across items, in declared order. The spec
    /// invariant is `= 1_000_000`; this crate tolerates a smaller sum by
    /// returning `None` from prize resolution rather than rejecting it
    /// (see gateway-fairness::engine::resolve_prize).
    pub fn total_probability_ppm(&self) -> u64 {
        self.items.iter().map(|i| i.probability_ppm).sum()
    }
}

/// The currency this crate accepts. The spec names `XTR` (Telegram Stars)
/// as the only supported currency; anything else is a `Fatal` misconfiguration
/// or an `invalid_currency` input rejection depending on where it's checked.
pub const XTR_CURRENCY: &str = "XTR";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_payload_round_trips() {
        let p = PaymentPayload::new("c1", 42, "abc123", 1_700_000_000);
        let encoded = p.encode().unwrap();
        assert!(encoded.len() <= PaymentPayload::MAX_ENCODED_BYTES);
        let decoded = PaymentPayload::decode(&encoded).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn charge_id_trims_and_rejects_blank() {
        assert_eq!(ChargeId::from_raw("  CH-1  ").unwrap().as_str(), "CH-1");
        assert!(ChargeId::from_raw("   ").is_none());
    }

    #[test]
    fn case_total_probability() {
        let case = CaseConfig {
            id: "c1".into(),
            title: "Case".into(),
            price_stars: 700,
            items: vec![
                PrizeItem { id: "p1".into(), kind: PrizeKind::Gift, star_cost: Some(700), probability_ppm: 400_000 },
                PrizeItem { id: "p2".into(), kind: PrizeKind::Internal, star_cost: None, probability_ppm: 300_000 },
            ],
        };
        assert_eq!(case.total_probability_ppm(), 700_000);
    }
}
