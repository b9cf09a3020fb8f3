use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use gateway_core::GatewayError;

/// HTTP-shaped wrapper around `GatewayError`. Every rejected request gets a
/// fresh `requestId` so operators can correlate a client-visible error with
/// the corresponding log line.
pub struct ApiError {
    status: StatusCode,
    body: serde_json::Value,
    retry_after_secs: Option<i64>,
}

impl ApiError {
    pub fn new(status: StatusCode, reason: &str) -> Self {
        Self {
            status,
            body: json!({
                "error": reason,
                "status": status.as_u16(),
                "requestId": gateway_crypto::nonce(12),
            }),
            retry_after_secs: None,
        }
    }

    pub fn bad_request(reason: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason)
    }

    pub fn unauthorized(reason: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, reason)
    }

    pub fn forbidden(reason: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, reason)
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match &err {
            GatewayError::InvalidPayload
            | GatewayError::NonceBlank
            | GatewayError::CaseIdBlank
            | GatewayError::CaseNotFound
            | GatewayError::UserMismatch
            | GatewayError::SenderMismatch
            | GatewayError::InvalidCurrency
            | GatewayError::InvalidAmount
            | GatewayError::ChargeIdBlank
            | GatewayError::InvalidMaxConnections
            | GatewayError::InvalidTtl
            | GatewayError::InvalidLimit
            | GatewayError::InvalidSince
            | GatewayError::InvalidDay
            | GatewayError::InvalidIp
            | GatewayError::InvalidCaseId
            | GatewayError::InvalidJson(_) => ApiError::bad_request(err.reason_code()),

            GatewayError::AdminTokenMissing | GatewayError::WebhookSecretMissing => {
                ApiError::unauthorized("unauthorized")
            }
            GatewayError::AdminTokenMismatch
            | GatewayError::WebhookSecretMismatch
            | GatewayError::MiniAppSignatureInvalid => ApiError::forbidden("forbidden"),

            GatewayError::RateLimited { kind, retry_after_secs } => ApiError {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: json!({
                    "error": "rate_limited",
                    "status": 429,
                    "requestId": gateway_crypto::nonce(12),
                    "type": kind,
                    "retryAfterSeconds": retry_after_secs,
                }),
                retry_after_secs: Some(*retry_after_secs),
            },

            GatewayError::UpstreamTransient(_) | GatewayError::UpstreamPermanent(_) => {
                ApiError::new(StatusCode::BAD_GATEWAY, "upstream_error")
            }

            // Duplicate charges/awards are absorbed idempotently upstream;
            // if one still reaches here, report success rather than a 409 so
            // retried webhooks don't look like failures to Telegram.
            GatewayError::Duplicate(_) => ApiError::new(StatusCode::OK, "duplicate"),

            GatewayError::Cancelled => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "cancelled"),
            GatewayError::Fatal(_) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            GatewayError::Storage(_) | GatewayError::Serialization(_) | GatewayError::Other(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.max(0).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
