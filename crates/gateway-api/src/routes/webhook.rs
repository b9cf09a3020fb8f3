//! Webhook front door (component I): validates the secret token and body
//! shape, parses updates, and enqueues them. Always answers `200 "ok"` once
//! the body has been accepted for processing — Telegram retries on non-2xx,
//! and a processing failure downstream must never turn into a webhook retry
//! storm.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use tracing::warn;

use gateway_core::WEBHOOK_MAX_BODY_BYTES;
use gateway_ingress::update::parse_updates;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
    if !content_type.is_empty() && !content_type.starts_with("application/json") {
        return Err(ApiError::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type"));
    }

    let secret = headers
        .get("x-telegram-bot-api-secret-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if secret.is_empty() {
        return Err(ApiError::from(gateway_core::GatewayError::WebhookSecretMissing));
    }
    if !gateway_crypto::ct_eq_str(secret, &state.webhook_secret_token) {
        return Err(ApiError::from(gateway_core::GatewayError::WebhookSecretMismatch));
    }

    if body.len() > WEBHOOK_MAX_BODY_BYTES {
        return Err(ApiError::bad_request("payload_too_large"));
    }

    let ip = crate::ip::client_ip(&headers, connect_info.as_ref(), state.trust_proxy);
    let updates = match parse_updates(&body) {
        Ok(updates) => updates,
        Err(err) => {
            warn!(error = %err, %ip, "rejecting malformed webhook body");
            return Err(ApiError::bad_request("invalid_payload"));
        }
    };

    let now_ms = gateway_ingress::now_ms();
    for update in updates {
        state.dispatcher.enqueue(update, now_ms).await;
    }

    Ok("ok")
}
