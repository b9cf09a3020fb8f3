//! Mini-app surface (components L/Q): verifies the Telegram WebApp
//! `initData` launch payload, then issues invoice links subject to IP ban,
//! token-bucket, and velocity checks (component C).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use gateway_antifraud::{EventType, VelocityAction, VelocityEvent};
use gateway_core::types::BucketKey;
use gateway_core::GatewayError;
use gateway_crypto::verify_init_data;

use crate::error::ApiError;
use crate::state::AppState;

const INVOICE_PATH: &str = "/api/miniapp/invoice";

#[derive(Debug, Deserialize)]
pub struct InvoiceRequest {
    #[serde(rename = "initData")]
    pub init_data: String,
    #[serde(rename = "caseId")]
    pub case_id: String,
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    #[serde(rename = "invoiceLink")]
    pub invoice_link: String,
}

pub async fn create_invoice(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<InvoiceRequest>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let ip = crate::ip::client_ip(&headers, connect_info.as_ref(), state.trust_proxy);
    let now = now_secs();
    let now_ms = now * 1000;

    let (banned, _) = state.suspicious_ips.is_banned(&ip, now_ms);
    if banned {
        return Err(ApiError::forbidden("ip_banned"));
    }

    let verified = verify_init_data(&req.init_data, &state.bot_token).map_err(|err| {
        warn!(%ip, error = %err, "mini-app init data rejected");
        ApiError::from(GatewayError::MiniAppSignatureInvalid)
    })?;

    let ip_decision = state.token_buckets.try_consume(&BucketKey::Ip(ip.clone()), state.ip_bucket_params, now_ms);
    if !ip_decision.allowed {
        return Err(ApiError::from(GatewayError::RateLimited {
            kind: "ip",
            retry_after_secs: ip_decision.retry_after_seconds.unwrap_or(1),
        }));
    }

    let subject_decision = state.token_buckets.try_consume(
        &BucketKey::Subject(verified.user_id),
        state.subject_bucket_params,
        now_ms,
    );
    if !subject_decision.allowed {
        return Err(ApiError::from(GatewayError::RateLimited {
            kind: "subject",
            retry_after_secs: subject_decision.retry_after_seconds.unwrap_or(1),
        }));
    }

    let ua = headers.get("user-agent").and_then(|v| v.to_str().ok());
    let event = VelocityEvent {
        event_type: EventType::Invoice,
        ip: &ip,
        subject_id: Some(verified.user_id),
        path: INVOICE_PATH,
        ua,
        ts_ms: now_ms,
    };
    let velocity_decision = state.velocity.check_and_record(&event);
    if velocity_decision.action == VelocityAction::HardBlockBeforePayment {
        return Err(ApiError::from(GatewayError::RateLimited { kind: "velocity", retry_after_secs: 5 }));
    }

    let result = state.invoices.create_invoice(&req.case_id, verified.user_id, now).await?;
    Ok(Json(InvoiceResponse { invoice_link: result.invoice_link }))
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is before the Unix epoch").as_secs() as i64
}
