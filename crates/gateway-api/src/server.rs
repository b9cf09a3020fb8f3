//! Router assembly (component R). One `Router` per process, built once at
//! startup and handed to the hyper server by `gateway-node`.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::routes::{admin, fairness, miniapp, webhook};
use crate::state::AppState;

/// Path the platform posts updates to; configurable so an operator can
/// rotate it without redeploying (component I).
pub fn router(state: Arc<AppState>, webhook_path: &str) -> Router<()> {
    Router::new()
        .route("/api/miniapp/invoice", post(miniapp::create_invoice))
        .route(webhook_path, post(webhook::handle_webhook))
        .route("/internal/telegram/webhook/set", post(admin::set_webhook))
        .route("/internal/telegram/webhook/delete", post(admin::delete_webhook))
        .route("/internal/telegram/webhook/info", get(admin::webhook_info))
        .route("/internal/antifraud/ip/mark-suspicious", post(admin::mark_suspicious))
        .route("/internal/antifraud/ip/ban", post(admin::ban))
        .route("/internal/antifraud/ip/unban", post(admin::unban))
        .route("/internal/antifraud/ip/list", get(admin::list_ips))
        .route("/internal/rng/commit-today", post(admin::rng_commit_today))
        .route("/internal/rng/reveal", post(admin::rng_reveal))
        .route("/fairness/today", get(fairness::today))
        .route("/fairness/reveal/:day", get(fairness::reveal))
        .route("/fairness/verify", post(fairness::verify))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
