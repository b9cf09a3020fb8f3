//! Public provably-fair surface (component F's read side): today's commit
//! hash, past-day reveal, and third-party verification of a revealed seed.
//! None of these require admin auth — the whole point is that anyone can
//! check the gateway's honesty.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use gateway_core::GatewayError;
use gateway_fairness::{RngCommitState, VerifyOutcome};

use crate::error::ApiError;
use crate::state::AppState;

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is before the Unix epoch").as_secs() as i64
}

#[derive(Debug, Serialize)]
pub struct TodayResponse {
    #[serde(rename = "dayUtc")]
    pub day_utc: String,
    #[serde(rename = "serverSeedHash")]
    pub server_seed_hash: String,
}

pub async fn today(State(state): State<Arc<AppState>>) -> Result<Json<TodayResponse>, ApiError> {
    let commit = state.rng.ensure_today_commit(now_secs()).await.map_err(fairness_error)?;
    Ok(Json(TodayResponse { day_utc: commit.day_utc().to_string(), server_seed_hash: commit.server_seed_hash().to_string() }))
}

pub async fn reveal(State(state): State<Arc<AppState>>, Path(day): Path<String>) -> Result<Json<RngCommitState>, ApiError> {
    if day.trim().is_empty() {
        return Err(ApiError::from(GatewayError::InvalidDay));
    }
    match state.rng.get_commit(&day).await.map_err(fairness_error)? {
        None => Err(ApiError::bad_request("not_found")),
        Some(_) => {
            let revealed = state.rng.reveal(&day, now_secs()).await.map_err(fairness_error)?;
            Ok(Json(revealed))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(rename = "dayUtc")]
    pub day_utc: String,
    #[serde(rename = "serverSeed")]
    pub server_seed: String,
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub nonce: String,
    #[serde(rename = "caseId")]
    pub case_id: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub ppm: u32,
    #[serde(rename = "rollHex")]
    pub roll_hex: String,
    #[serde(rename = "serverSeedHash")]
    pub server_seed_hash: String,
    pub valid: bool,
}

pub async fn verify(State(state): State<Arc<AppState>>, Json(req): Json<VerifyRequest>) -> Result<Json<VerifyResponse>, ApiError> {
    if req.day_utc.trim().is_empty() {
        return Err(ApiError::from(GatewayError::InvalidDay));
    }
    if req.nonce.trim().is_empty() {
        return Err(ApiError::from(GatewayError::NonceBlank));
    }
    if req.case_id.trim().is_empty() {
        return Err(ApiError::from(GatewayError::CaseIdBlank));
    }

    let outcome = state
        .rng
        .verify(&req.day_utc, &req.server_seed, req.user_id, &req.nonce, &req.case_id)
        .await
        .map_err(fairness_error)?;

    match outcome {
        VerifyOutcome::CommitMissing => Err(ApiError::bad_request("not_found")),
        VerifyOutcome::InvalidServerSeed => Err(ApiError::bad_request("invalid_server_seed")),
        VerifyOutcome::ServerSeedMismatch => Err(ApiError::bad_request("server_seed_mismatch")),
        VerifyOutcome::Success(result) => Ok(Json(VerifyResponse {
            ppm: result.ppm,
            roll_hex: result.roll_hex,
            server_seed_hash: result.server_seed_hash,
            valid: true,
        })),
    }
}

fn fairness_error(e: gateway_fairness::FairnessError) -> ApiError {
    match &e {
        gateway_fairness::FairnessError::Journal(_) => ApiError::from(GatewayError::Storage(e.to_string())),
        gateway_fairness::FairnessError::DayNotElapsed(_) => ApiError::bad_request("day_not_elapsed"),
        gateway_fairness::FairnessError::HashMismatch(_) => ApiError::from(GatewayError::Fatal(e.to_string())),
    }
}
