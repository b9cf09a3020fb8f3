//! Admin surface (component R): webhook lifecycle, antifraud IP management,
//! and RNG commit/reveal, all gated on `X-Admin-Token`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use gateway_antifraud::SuspiciousIpEntry;
use gateway_core::GatewayError;
use gateway_fairness::RngCommitState;

use crate::error::ApiError;
use crate::state::AppState;

fn require_admin(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    let Some(expected) = &state.admin_token else {
        return Err(ApiError::from(GatewayError::AdminTokenMissing));
    };
    let provided = headers.get("x-admin-token").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided.is_empty() {
        return Err(ApiError::from(GatewayError::AdminTokenMissing));
    }
    if !gateway_crypto::ct_eq_str(provided, expected) {
        return Err(ApiError::from(GatewayError::AdminTokenMismatch));
    }
    Ok(())
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is before the Unix epoch").as_millis() as i64
}

// ── Webhook lifecycle ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SetWebhookRequest {
    pub url: String,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub drop_pending: Option<bool>,
}

pub async fn set_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SetWebhookRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&headers, &state)?;
    if let Some(max) = req.max_connections {
        if !(1..=100).contains(&max) {
            return Err(ApiError::from(GatewayError::InvalidMaxConnections));
        }
    }
    let ok = state
        .platform
        .set_webhook(&req.url, &state.webhook_secret_token, None, req.max_connections, req.drop_pending)
        .await
        .map_err(upstream_error)?;
    Ok(Json(serde_json::json!({ "ok": ok })))
}

pub async fn delete_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&headers, &state)?;
    let ok = state.platform.delete_webhook(false).await.map_err(upstream_error)?;
    Ok(Json(serde_json::json!({ "ok": ok })))
}

pub async fn webhook_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&headers, &state)?;
    let info = state.platform.get_webhook_info().await.map_err(upstream_error)?;
    Ok(Json(serde_json::json!({
        "url": info.url,
        "pendingUpdateCount": info.pending_update_count,
    })))
}

fn upstream_error(e: gateway_ingress::platform_client::PlatformError) -> ApiError {
    if e.is_transient() {
        ApiError::from(GatewayError::UpstreamTransient(e.to_string()))
    } else {
        ApiError::from(GatewayError::UpstreamPermanent(e.to_string()))
    }
}

// ── Antifraud IP management ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IpActionRequest {
    pub ip: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

fn validate_ip(ip: &str) -> Result<(), ApiError> {
    if ip.trim().is_empty() {
        return Err(ApiError::from(GatewayError::InvalidIp));
    }
    Ok(())
}

pub async fn mark_suspicious(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IpActionRequest>,
) -> Result<Json<SuspiciousIpEntry>, ApiError> {
    require_admin(&headers, &state)?;
    validate_ip(&req.ip)?;
    let entry = state.suspicious_ips.mark_suspicious(&req.ip, req.reason, now_ms());
    Ok(Json(entry))
}

pub async fn ban(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IpActionRequest>,
) -> Result<Json<SuspiciousIpEntry>, ApiError> {
    require_admin(&headers, &state)?;
    validate_ip(&req.ip)?;
    let ttl = req.ttl_seconds.unwrap_or(0);
    if ttl < 0 {
        return Err(ApiError::from(GatewayError::InvalidTtl));
    }
    let entry = state.suspicious_ips.ban(&req.ip, ttl, req.reason, now_ms());
    Ok(Json(entry))
}

pub async fn unban(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IpActionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&headers, &state)?;
    validate_ip(&req.ip)?;
    let unbanned = state.suspicious_ips.unban(&req.ip);
    Ok(Json(serde_json::json!({ "unbanned": unbanned })))
}

#[derive(Debug, Deserialize)]
pub struct ListIpQuery {
    #[serde(rename = "type", default = "default_list_type")]
    pub list_type: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(rename = "sinceMs", default)]
    pub since_ms: Option<i64>,
}

fn default_list_type() -> String {
    "recent".to_string()
}

fn default_limit() -> usize {
    100
}

pub async fn list_ips(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListIpQuery>,
) -> Result<Json<Vec<SuspiciousIpEntry>>, ApiError> {
    require_admin(&headers, &state)?;
    if query.limit == 0 || query.limit > 1000 {
        return Err(ApiError::from(GatewayError::InvalidLimit));
    }
    if let Some(since) = query.since_ms {
        if since < 0 {
            return Err(ApiError::from(GatewayError::InvalidSince));
        }
    }
    let now = now_ms();
    let entries = match query.list_type.as_str() {
        "recent" => state.suspicious_ips.list_recent(query.limit, query.since_ms, now),
        "banned" => state.suspicious_ips.list_banned(query.limit, now),
        _ => return Err(ApiError::bad_request("invalid_list_type")),
    };
    Ok(Json(entries))
}

// ── RNG commit / reveal ───────────────────────────────────────────────────────

pub async fn rng_commit_today(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RngCommitState>, ApiError> {
    require_admin(&headers, &state)?;
    let commit = state.rng.ensure_today_commit(now_ms() / 1000).await.map_err(fairness_error)?;
    Ok(Json(commit))
}

#[derive(Debug, Deserialize)]
pub struct RevealQuery {
    pub day: Option<String>,
}

pub async fn rng_reveal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<RevealQuery>,
) -> Result<Json<RngCommitState>, ApiError> {
    require_admin(&headers, &state)?;
    let day = query.day.ok_or(GatewayError::InvalidDay)?;
    if day.trim().is_empty() {
        return Err(ApiError::from(GatewayError::InvalidDay));
    }
    let revealed = state.rng.reveal(&day, now_ms() / 1000).await.map_err(fairness_error)?;
    Ok(Json(revealed))
}

fn fairness_error(e: gateway_fairness::FairnessError) -> ApiError {
    match &e {
        gateway_fairness::FairnessError::Journal(_) => ApiError::from(GatewayError::Storage(e.to_string())),
        gateway_fairness::FairnessError::DayNotElapsed(_) => ApiError::bad_request("day_not_elapsed"),
        gateway_fairness::FairnessError::HashMismatch(_) => ApiError::from(GatewayError::Fatal(e.to_string())),
    }
}

