//! Outbound HTTP: talking to the directory and to peer relays. Grounded in
//! `messenger_gateway::office_client::OfficeClient` — a thin `reqwest`
//! wrapper with a fixed timeout and a three-way error split.

use std::time::Duration;

use letter_ledger::{Block, ChainManifest};
use letter_registry::RelayRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from any outbound call this binary makes.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("remote returned status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Parse(String),
}

impl TransportError {
    fn from_reqwest(err: &reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

/// `{onion, publicUrl, publicAccessUrl, nickname, fingerprint, latencyMs?,
/// reachability?, gfwBlocked?, chainSummary}` (§6.1 heartbeat payload shape).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub onion: String,
    pub public_url: String,
    pub public_access_url: Option<String>,
    pub nickname: Option<String>,
    pub fingerprint: String,
    pub latency_ms: Option<f64>,
    pub reachability: Option<f64>,
    pub gfw_blocked: Option<bool>,
    pub chain_summary: ChainManifest,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub relay: RelayRecord,
    pub genesis_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaysResponse {
    pub relays: Vec<RelayRecord>,
    pub manifest: Option<ChainManifest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestRelayResponse {
    pub onion: Option<String>,
    pub public_url: Option<String>,
    pub available: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlocksResponse {
    pub blocks: Vec<Block>,
}

/// Talks to exactly one directory instance.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl DirectoryClient {
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        Self { base_url, client }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    pub async fn list_relays(&self) -> Result<RelaysResponse, TransportError> {
        let base = self.base_url.as_ref().ok_or(TransportError::Network("directory not configured".into()))?;
        let url = format!("{base}/api/relays");
        let response = self.client.get(&url).send().await.map_err(|e| TransportError::from_reqwest(&e))?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        response.json().await.map_err(|e| TransportError::Parse(e.to_string()))
    }

    pub async fn best_relay(&self) -> Result<BestRelayResponse, TransportError> {
        let base = self.base_url.as_ref().ok_or(TransportError::Network("directory not configured".into()))?;
        let url = format!("{base}/api/relays/best");
        let response = self.client.get(&url).send().await.map_err(|e| TransportError::from_reqwest(&e))?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        response.json().await.map_err(|e| TransportError::Parse(e.to_string()))
    }

    pub async fn report(&self, payload: &HeartbeatRequest) -> Result<HeartbeatResponse, TransportError> {
        let base = self.base_url.as_ref().ok_or(TransportError::Network("directory not configured".into()))?;
        let url = format!("{base}/api/relays");
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        response.json().await.map_err(|e| TransportError::Parse(e.to_string()))
    }
}

/// Talks to whichever peer relay the selector picked.
#[derive(Debug, Clone)]
pub struct PeerClient {
    client: reqwest::Client,
}

impl PeerClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        Self { client }
    }

    pub async fn fetch_blocks(&self, peer_url: &str) -> Result<Vec<Block>, TransportError> {
        let url = format!("{peer_url}/api/blocks/full");
        let response = self.client.get(&url).send().await.map_err(|e| TransportError::from_reqwest(&e))?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        let body: BlocksResponse = response.json().await.map_err(|e| TransportError::Parse(e.to_string()))?;
        Ok(body.blocks)
    }
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new()
    }
}
