//! Directory HTTP surface (§6.1): the relay-facing registry API. Grounded
//! in the same `Router::new().route(...).with_state(...)` shape as
//! `relay-node::http`, which in turn follows `ubl-server::main`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use letter_registry::{select_best, HeartbeatPayload, RelayRecord};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::broadcast;
use crate::state::DirectoryState;

pub fn router(state: Arc<DirectoryState>, http_client: reqwest::Client) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/relays", get(route_list_relays).post(route_upsert_relay))
        .route("/api/relays/best", get(route_best_relay))
        .with_state((state, http_client))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// A relay record plus its derived reputation (§6.1: "round(reachability * 100)").
#[derive(Serialize)]
struct RelayWithReputation {
    #[serde(flatten)]
    record: RelayRecord,
    reputation: u32,
}

fn reputation_of(record: &RelayRecord) -> u32 {
    record.reachability.map(|r| (r * 100.0).round() as u32).unwrap_or(0)
}

#[derive(Serialize)]
struct RelaysResponse {
    relays: Vec<RelayWithReputation>,
    manifest: Option<letter_ledger::ChainManifest>,
}

async fn route_list_relays(
    State((state, _client)): State<(Arc<DirectoryState>, reqwest::Client)>,
) -> impl IntoResponse {
    let registry = state.registry.lock().await;
    let relays = registry
        .relays()
        .map(|r| RelayWithReputation { reputation: reputation_of(r), record: r.clone() })
        .collect();
    Json(RelaysResponse { relays, manifest: registry.canonical_manifest().cloned() })
}

#[derive(Serialize)]
struct BestRelayResponse {
    onion: Option<String>,
    public_url: Option<String>,
    available: bool,
}

async fn route_best_relay(
    State((state, _client)): State<(Arc<DirectoryState>, reqwest::Client)>,
) -> impl IntoResponse {
    let registry = state.registry.lock().await;
    let candidates = registry.candidates(None);
    match select_best(&candidates) {
        Some(best) => Json(BestRelayResponse {
            onion: Some(best.record.onion.clone()),
            public_url: Some(best.record.public_url.clone()),
            available: true,
        }),
        None => Json(BestRelayResponse { onion: None, public_url: None, available: false }),
    }
}

#[derive(Serialize)]
struct UpsertResponse {
    relay: RelayRecord,
    genesis_hash: Option<String>,
}

async fn route_upsert_relay(
    State((state, client)): State<(Arc<DirectoryState>, reqwest::Client)>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<HeartbeatPayload>,
) -> impl IntoResponse {
    let onion = payload.onion.clone();
    let client_addr = addr.ip().to_string();

    let mut registry = state.registry.lock().await;
    let record = match registry.upsert(payload, Some(&client_addr)) {
        Ok(record) => record.clone(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let genesis_hash = registry.canonical_manifest().and_then(|m| m.hashes.first().cloned());

    let targets: Vec<(String, String)> = registry
        .relays()
        .filter(|r| !r.public_url.is_empty())
        .map(|r| (r.onion.clone(), r.public_url.clone()))
        .collect();
    drop(registry);

    broadcast::fan_out(client, onion, targets);

    Json(UpsertResponse { relay: record, genesis_hash }).into_response()
}
