use thiserror::Error;

/// The gateway's error taxonomy — kinds, not type names, per the error
/// handling design. Each group maps to one HTTP status and a stable JSON
/// reason code at the API boundary (see gateway-api::server::error_response).
#[derive(Debug, Error)]
pub enum GatewayError {
    // ── InputRejection — 400, stable reason codes ────────────────────────────
    #[error("invalid_payload")]
    InvalidPayload,
    #[error("nonce_blank")]
    NonceBlank,
    #[error("case_id_blank")]
    CaseIdBlank,
    #[error("case_not_found")]
    CaseNotFound,
    #[error("user_mismatch")]
    UserMismatch,
    #[error("sender_mismatch")]
    SenderMismatch,
    #[error("invalid_currency")]
    InvalidCurrency,
    #[error("invalid_amount")]
    InvalidAmount,
    #[error("charge_id_blank")]
    ChargeIdBlank,
    #[error("invalid_max_connections")]
    InvalidMaxConnections,
    #[error("invalid_ttl")]
    InvalidTtl,
    #[error("invalid_limit")]
    InvalidLimit,
    #[error("invalid_since")]
    InvalidSince,
    #[error("invalid_day")]
    InvalidDay,
    #[error("invalid_ip")]
    InvalidIp,
    #[error("invalid_case_id")]
    InvalidCaseId,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    // ── AuthRejection — 401/403 ───────────────────────────────────────────────
    #[error("missing admin token")]
    AdminTokenMissing,
    #[error("wrong admin token")]
    AdminTokenMismatch,
    #[error("missing webhook secret")]
    WebhookSecretMissing,
    #[error("wrong webhook secret")]
    WebhookSecretMismatch,
    #[error("bad mini-app signature")]
    MiniAppSignatureInvalid,

    // ── RateLimitRejection — 429 ──────────────────────────────────────────────
    #[error("rate limited: {kind}")]
    RateLimited { kind: &'static str, retry_after_secs: i64 },

    // ── Upstream ──────────────────────────────────────────────────────────────
    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),
    #[error("upstream permanent error: {0}")]
    UpstreamPermanent(String),

    // ── StateConflict ─────────────────────────────────────────────────────────
    #[error("duplicate: {0}")]
    Duplicate(String),

    // ── Cancellation ──────────────────────────────────────────────────────────
    #[error("cancelled")]
    Cancelled,

    // ── Fatal — misconfiguration, surfaced at startup ────────────────────────
    #[error("fatal misconfiguration: {0}")]
    Fatal(String),

    // ── Storage / serialization ───────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),

    // ── Catch-all ─────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Whether this error represents cooperative cancellation, which must
    /// always be re-raised rather than absorbed.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, GatewayError::Cancelled)
    }

    /// Stable reason code used in HTTP error bodies, mirroring the §7 list.
    pub fn reason_code(&self) -> &'static str {
        match self {
            GatewayError::InvalidPayload => "invalid_payload",
            GatewayError::NonceBlank => "nonce_blank",
            GatewayError::CaseIdBlank => "case_id_blank",
            GatewayError::CaseNotFound => "case_not_found",
            GatewayError::UserMismatch => "user_mismatch",
            GatewayError::SenderMismatch => "sender_mismatch",
            GatewayError::InvalidCurrency => "invalid_currency",
            GatewayError::InvalidAmount => "invalid_amount",
            GatewayError::ChargeIdBlank => "charge_id_blank",
            GatewayError::InvalidMaxConnections => "invalid_max_connections",
            GatewayError::InvalidTtl => "invalid_ttl",
            GatewayError::InvalidLimit => "invalid_limit",
            GatewayError::InvalidSince => "invalid_since",
            GatewayError::InvalidDay => "invalid_day",
            GatewayError::InvalidIp => "invalid_ip",
            GatewayError::InvalidCaseId => "invalid_case_id",
            GatewayError::InvalidJson(_) => "invalid_json",
            GatewayError::RateLimited { .. } => "rate_limited",
            _ => "internal_error",
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_detected() {
        assert!(GatewayError::Cancelled.is_cancellation());
        assert!(!GatewayError::InvalidPayload.is_cancellation());
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(GatewayError::NonceBlank.reason_code(), "nonce_blank");
        assert_eq!(
            GatewayError::RateLimited { kind: "velocity", retry_after_secs: 5 }.reason_code(),
            "rate_limited"
        );
    }
}
