//! Heartbeat & reporting loop (§4.6): periodically push `{onion, publicUrl,
//! metrics, chainSummary}` to the directory, single-flight like pre-write
//! sync, with a consecutive-failure backoff and the genesis-switch handling
//! from §9.1 resolution #1 (switch the active pointer, never snapshot or
//! requeue for a directory-assigned genesis change).

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use letter_ledger::{ChainStore, Ledger};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::directory_client::{DirectoryClient, HeartbeatRequest};
use crate::identity::RelayIdentity;

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const BACKOFF_STEP: Duration = Duration::from_secs(2);

type SharedReport = Shared<BoxFuture<'static, Result<(), String>>>;

pub struct Reporter {
    config: Arc<Mutex<RelayConfig>>,
    config_path: std::path::PathBuf,
    identity: RelayIdentity,
    ledger: Arc<Mutex<Ledger>>,
    chain_store: ChainStore,
    directory: Arc<DirectoryClient>,
    in_flight: Mutex<Option<SharedReport>>,
    consecutive_failures: Mutex<u32>,
}

impl Reporter {
    pub fn new(
        config: Arc<Mutex<RelayConfig>>,
        config_path: std::path::PathBuf,
        identity: RelayIdentity,
        ledger: Arc<Mutex<Ledger>>,
        chain_store: ChainStore,
        directory: Arc<DirectoryClient>,
    ) -> Self {
        Self {
            config,
            config_path,
            identity,
            ledger,
            chain_store,
            directory,
            in_flight: Mutex::new(None),
            consecutive_failures: Mutex::new(0),
        }
    }

    /// Non-blocking trigger used by the write pipeline after every accepted
    /// letter (§4.2 step 4). Joins the in-flight report if one is running.
    pub fn trigger_background(self: &Arc<Self>) {
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = reporter.report().await {
                warn!(error = %e, "background report failed");
            }
        });
    }

    /// The report timer loop (§4.6), run for the lifetime of the process.
    pub async fn run_timer(self: Arc<Self>, interval: Duration) {
        loop {
            let delay = match self.report().await {
                Ok(()) => {
                    *self.consecutive_failures.lock().await = 0;
                    interval
                }
                Err(e) => {
                    let mut failures = self.consecutive_failures.lock().await;
                    *failures += 1;
                    let backoff = BACKOFF_STEP.saturating_mul(*failures).min(MAX_BACKOFF);
                    warn!(error = %e, failures = *failures, "heartbeat report failed, backing off");
                    backoff
                }
            };
            tokio::time::sleep(delay).await;
        }
    }

    async fn report(self: &Arc<Self>) -> Result<(), String> {
        let mut guard = self.in_flight.lock().await;
        if let Some(shared) = guard.as_ref() {
            let shared = shared.clone();
            drop(guard);
            return shared.await;
        }

        let reporter = Arc::clone(self);
        let fut: BoxFuture<'static, Result<(), String>> = async move { reporter.run_report().await }.boxed();
        let shared = fut.shared();
        *guard = Some(shared.clone());
        drop(guard);

        let result = shared.await;
        *self.in_flight.lock().await = None;
        result
    }

    async fn run_report(&self) -> Result<(), String> {
        if !self.directory.is_configured() {
            return Ok(());
        }

        let (onion, public_url, public_access_url, nickname, metrics) = {
            let config = self.config.lock().await;
            (
                config.onion.clone(),
                config.public_url.clone(),
                config.public_access_url.clone(),
                config.nickname.clone(),
                config.metrics.clone(),
            )
        };
        let manifest = self
            .ledger
            .lock()
            .await
            .manifest()
            .map_err(|e| e.to_string())?;

        let payload = HeartbeatRequest {
            onion,
            public_url,
            public_access_url,
            nickname,
            fingerprint: self.identity.fingerprint.clone(),
            latency_ms: metrics.latency_ms,
            reachability: metrics.reachability,
            gfw_blocked: metrics.gfw_blocked,
            chain_summary: manifest,
        };

        let response = self.directory.report(&payload).await.map_err(|e| e.to_string())?;
        info!(relay_id = %response.relay.id, "heartbeat report accepted");

        if let Some(genesis_hash) = response.genesis_hash {
            self.maybe_switch_genesis(genesis_hash).await?;
        }

        Ok(())
    }

    /// §9.1 resolution #1: a directory-assigned genesis change swaps the
    /// active chain pointer outright. No snapshot, no requeue — the relay
    /// simply starts following the chain the directory says is canonical.
    async fn maybe_switch_genesis(&self, genesis_hash: String) -> Result<(), String> {
        let current = self.config.lock().await.active_genesis_hash.clone();
        if current.as_deref() == Some(genesis_hash.as_str()) {
            return Ok(());
        }

        let new_ledger = self.chain_store.open(&genesis_hash).map_err(|e| e.to_string())?;
        *self.ledger.lock().await = new_ledger;

        let mut config = self.config.lock().await;
        config.active_genesis_hash = Some(genesis_hash.clone());
        config.save(&self.config_path).map_err(|e| e.to_string())?;
        drop(config);

        info!(genesis_hash = %genesis_hash, "switched active genesis on directory instruction");
        Ok(())
    }
}
