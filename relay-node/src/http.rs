//! Relay HTTP surface (§6.1): status, full-chain export, letter submission,
//! directory report fan-in, and the sync trigger a peer calls after a
//! broadcast. Grounded in `ubl-server::main`'s `AppState`/`State<..>`/
//! `Router::new().route(...)` shape — one flat router, one shared state.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::pipeline::LetterRequest;
use crate::state::RelayState;

pub fn router(state: Arc<RelayState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/status", get(route_status))
        .route("/api/blocks/full", get(route_blocks_full))
        .route("/api/letters", post(route_submit_letter))
        .route("/api/report", post(route_report))
        .route("/api/sync", post(route_sync))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// `{summary, config, queue, lastConflict}` (§6.1).
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    summary: letter_ledger::ChainManifest,
    config: crate::config::RelayConfig,
    queue: crate::pipeline::QueueStatusSnapshot,
    last_conflict: Option<crate::sync::ConflictReport>,
}

async fn route_status(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let config = state.config.lock().await.clone();
    let manifest = state.ledger.lock().await.manifest();
    let queue = state.pipeline.queue_status().await;
    let last_conflict = state.sync_engine.last_conflict().await;

    match manifest {
        Ok(summary) => Json(StatusResponse { summary, config, queue, last_conflict }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Serialize)]
struct BlocksResponse {
    blocks: Vec<letter_ledger::Block>,
}

/// GET /api/blocks/full — what peers fetch to sync against this relay.
async fn route_blocks_full(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let ledger = state.ledger.lock().await;
    Json(BlocksResponse { blocks: ledger.blocks().to_vec() })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitLetterBody {
    payload: String,
    owner_fingerprint: String,
    #[serde(default)]
    relay_metrics: Value,
}

async fn route_submit_letter(
    State(state): State<Arc<RelayState>>,
    Json(body): Json<SubmitLetterBody>,
) -> impl IntoResponse {
    if body.payload.is_empty() || body.owner_fingerprint.is_empty() {
        return (StatusCode::BAD_REQUEST, "payload and ownerFingerprint are required".to_string())
            .into_response();
    }

    let request = LetterRequest {
        payload: body.payload,
        owner_fingerprint: body.owner_fingerprint,
        relay_metrics: body.relay_metrics,
    };

    match state.pipeline.accept_letter(request).await {
        Ok(block) => Json(serde_json::json!({ "block": block })).into_response(),
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, err.to_string()).into_response()
        }
    }
}

/// POST /api/report — the directory tells this relay about itself (used in
/// local multi-relay setups where relays also act as light directories).
async fn route_report(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    state.reporter.trigger_background();
    StatusCode::ACCEPTED
}

/// POST /api/sync — a peer pinging "I just wrote a block, you may be behind"
/// (§4.4 Broadcast). Runs a pre-write sync cycle without blocking a letter.
async fn route_sync(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    match state.sync_engine.pre_write_sync().await {
        Ok(outcome) => Json(serde_json::json!({ "outcome": format!("{:?}", outcome) })).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}
