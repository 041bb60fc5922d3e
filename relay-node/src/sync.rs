//! Chain Sync Engine (§4.3): pick a peer, fetch its chain, classify the
//! comparison, and resolve forks by longest-chain-wins while preserving the
//! losing fork's letters. Pre-write sync is single-flight: concurrent
//! callers join the one in-flight cycle via a `futures::future::Shared`
//! cached behind a mutex, cleared once it resolves.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use letter_ledger::{compare_chains, Block, ChainComparison, ChainStore, Ledger, PendingEntry, SyncOutcome};
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::directory_client::{DirectoryClient, PeerClient};
use crate::error::{PreWriteSyncOutcome, SyncError, NO_ALTERNATE_RELAY, NO_DIRECTORY_CONFIGURED};
use crate::pipeline::PipelineHandle;

type SharedSync = Shared<BoxFuture<'static, Result<PreWriteSyncOutcome, SyncError>>>;

/// Diagnostic breadcrumb left behind after a fork resolution (§4.3 step 4).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub resolved_at: String,
    pub diverge_at: usize,
    pub local_height: usize,
    pub remote_height: usize,
    pub backup_path: Option<String>,
    pub replayed_letters: usize,
}

pub struct SyncEngine {
    onion: String,
    ledger: Arc<Mutex<Ledger>>,
    chain_store: ChainStore,
    directory: Arc<DirectoryClient>,
    peer_client: PeerClient,
    pipeline: OnceCell<PipelineHandle>,
    last_conflict: Mutex<Option<ConflictReport>>,
    in_flight: Mutex<Option<SharedSync>>,
}

impl SyncEngine {
    pub fn new(
        onion: String,
        ledger: Arc<Mutex<Ledger>>,
        chain_store: ChainStore,
        directory: Arc<DirectoryClient>,
    ) -> Self {
        Self {
            onion,
            ledger,
            chain_store,
            directory,
            peer_client: PeerClient::new(),
            pipeline: OnceCell::new(),
            last_conflict: Mutex::new(None),
            in_flight: Mutex::new(None),
        }
    }

    /// Wired in after the pipeline worker is spawned (the two depend on
    /// each other: the pipeline calls `pre_write_sync`, the sync engine
    /// replays orphaned letters back into the pipeline).
    pub fn attach_pipeline(&self, handle: PipelineHandle) {
        let _ = self.pipeline.set(handle);
    }

    pub async fn last_conflict(&self) -> Option<ConflictReport> {
        self.last_conflict.lock().await.clone()
    }

    /// §4.3 "Pre-write sync semantics": at most one cycle in flight at a time.
    pub async fn pre_write_sync(self: &Arc<Self>) -> Result<PreWriteSyncOutcome, SyncError> {
        let mut guard = self.in_flight.lock().await;
        if let Some(shared) = guard.as_ref() {
            let shared = shared.clone();
            drop(guard);
            return shared.await;
        }

        let engine = Arc::clone(self);
        let fut: BoxFuture<'static, Result<PreWriteSyncOutcome, SyncError>> =
            async move { engine.run_cycle().await }.boxed();
        let shared = fut.shared();
        *guard = Some(shared.clone());
        drop(guard);

        let result = shared.await;
        *self.in_flight.lock().await = None;
        result
    }

    /// Driven by the sync timer (§4.6); logs its own outcome.
    pub async fn run_timer_tick(self: &Arc<Self>) {
        match self.pre_write_sync().await {
            Ok(PreWriteSyncOutcome::Skipped { reason }) => info!(reason = %reason, "sync tick skipped"),
            Ok(PreWriteSyncOutcome::Performed(outcome)) => {
                info!(updated = outcome.updated, message = %outcome.message, "sync tick completed")
            }
            Err(e) => warn!(error = %e, "sync tick failed"),
        }
    }

    async fn run_cycle(&self) -> Result<PreWriteSyncOutcome, SyncError> {
        if !self.directory.is_configured() {
            return Ok(PreWriteSyncOutcome::Skipped {
                reason: NO_DIRECTORY_CONFIGURED.to_string(),
            });
        }

        let best = match self.directory.best_relay().await {
            Ok(best) => best,
            Err(e) => return Err(SyncError::Transport(e.to_string())),
        };

        let peer_url = match (best.available, best.onion, best.public_url) {
            (true, Some(onion), Some(url)) if onion != self.onion && !url.is_empty() => url,
            _ => {
                return Ok(PreWriteSyncOutcome::Skipped {
                    reason: NO_ALTERNATE_RELAY.to_string(),
                })
            }
        };

        let remote_blocks = match self.peer_client.fetch_blocks(&peer_url).await {
            Ok(blocks) if !blocks.is_empty() => blocks,
            _ => {
                return Ok(PreWriteSyncOutcome::Skipped {
                    reason: "peer chain missing or malformed".to_string(),
                })
            }
        };

        let local_blocks = self.ledger.lock().await.blocks().to_vec();

        match compare_chains(&local_blocks, &remote_blocks) {
            ChainComparison::UpToDate => Ok(PreWriteSyncOutcome::Performed(SyncOutcome {
                updated: false,
                message: "local chain is up to date".to_string(),
            })),
            ChainComparison::CleanExtension => {
                let outcome = self
                    .ledger
                    .lock()
                    .await
                    .sync_from_remote(remote_blocks, false)
                    .map_err(|e| SyncError::InvalidRemote(e.to_string()))?;
                Ok(PreWriteSyncOutcome::Performed(outcome))
            }
            ChainComparison::ForkRemoteLoses { diverge_at } => {
                info!(diverge_at, "remote is the losing fork, no action");
                Ok(PreWriteSyncOutcome::Performed(SyncOutcome {
                    updated: false,
                    message: "remote fork is shorter, ignored".to_string(),
                }))
            }
            ChainComparison::ForkLocalLoses { diverge_at } => {
                self.resolve_fork(local_blocks, remote_blocks, diverge_at).await
            }
        }
    }

    /// §4.3 fork resolution: snapshot, harvest, replace, record, trigger.
    async fn resolve_fork(
        &self,
        local_blocks: Vec<Block>,
        remote_blocks: Vec<Block>,
        diverge_at: usize,
    ) -> Result<PreWriteSyncOutcome, SyncError> {
        let genesis_hash = local_blocks.first().map(|b| b.hash.clone()).unwrap_or_default();

        let backup_path = match self.chain_store.snapshot_conflict(&genesis_hash, &local_blocks) {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                warn!(error = %e, "conflict snapshot failed, continuing fork resolution");
                None
            }
        };

        let replayed: Vec<PendingEntry> = local_blocks[diverge_at..]
            .iter()
            .flat_map(|block| {
                block.letters.iter().map(move |letter| {
                    PendingEntry::replayed(
                        letter.owner_fingerprint.clone(),
                        letter.payload.clone(),
                        block.relay_metrics.clone(),
                        block.index,
                    )
                })
            })
            .collect();
        let replayed_letters = replayed.len();

        if let Some(pipeline) = self.pipeline.get() {
            pipeline.replay(replayed);
        } else {
            warn!("pipeline not yet attached, orphaned letters dropped from replay");
        }

        let outcome = self
            .ledger
            .lock()
            .await
            .sync_from_remote(remote_blocks.clone(), true)
            .map_err(|e| SyncError::InvalidRemote(e.to_string()))?;

        *self.last_conflict.lock().await = Some(ConflictReport {
            resolved_at: letter_ledger::now_iso8601(),
            diverge_at,
            local_height: local_blocks.len(),
            remote_height: remote_blocks.len(),
            backup_path,
            replayed_letters,
        });

        Ok(PreWriteSyncOutcome::Performed(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use letter_ledger::LetterEntry;
    use tempfile::tempdir;

    fn engine(root: &std::path::Path) -> (Arc<SyncEngine>, ChainStore, String) {
        let chain_store = ChainStore::new(root.join("chains"));
        let (ledger, genesis_hash) = chain_store.bootstrap().unwrap();
        let ledger = Arc::new(Mutex::new(ledger));
        let directory = Arc::new(DirectoryClient::new(None));
        let engine = Arc::new(SyncEngine::new("self-onion".to_string(), Arc::clone(&ledger), chain_store.clone(), directory));
        (engine, chain_store, genesis_hash)
    }

    #[tokio::test]
    async fn pre_write_sync_skips_with_no_directory_configured_reason() {
        let dir = tempdir().unwrap();
        let (engine, _store, _genesis) = engine(dir.path());

        let outcome = engine.pre_write_sync().await.unwrap();
        match outcome {
            PreWriteSyncOutcome::Skipped { reason } => assert_eq!(reason, NO_DIRECTORY_CONFIGURED),
            other => panic!("expected Skipped, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_fork_replays_orphaned_letters_and_records_conflict() {
        let dir = tempdir().unwrap();
        let (engine, store, genesis_hash) = engine(dir.path());

        // Build a local chain: genesis -> letter A (this is the losing fork).
        let local_before = {
            let mut ledger = engine.ledger.lock().await;
            ledger
                .append_letter_block(
                    LetterEntry { owner_fingerprint: "fp-a".into(), payload: "payload-a".into() },
                    serde_json::json!({}),
                    "letter accepted",
                )
                .unwrap();
            ledger.blocks().to_vec()
        };
        assert_eq!(local_before.len(), 2);

        // Build a competing remote chain off the same genesis, one block longer:
        // genesis -> letter B -> letter C.
        let mut remote_store_ledger = store.open(&genesis_hash).unwrap();
        remote_store_ledger
            .append_letter_block(
                LetterEntry { owner_fingerprint: "fp-b".into(), payload: "payload-b".into() },
                serde_json::json!({}),
                "letter accepted",
            )
            .unwrap();
        remote_store_ledger
            .append_letter_block(
                LetterEntry { owner_fingerprint: "fp-c".into(), payload: "payload-c".into() },
                serde_json::json!({}),
                "letter accepted",
            )
            .unwrap();
        let remote_blocks = remote_store_ledger.blocks().to_vec();

        match compare_chains(&local_before, &remote_blocks) {
            ChainComparison::ForkLocalLoses { diverge_at } => {
                let outcome = engine
                    .resolve_fork(local_before.clone(), remote_blocks.clone(), diverge_at)
                    .await
                    .unwrap();
                match outcome {
                    PreWriteSyncOutcome::Performed(sync_outcome) => assert!(sync_outcome.updated),
                    other => panic!("expected Performed, got {other:?}"),
                }
            }
            other => panic!("expected ForkLocalLoses, got {other:?}"),
        }

        assert_eq!(engine.ledger.lock().await.blocks(), remote_blocks.as_slice());

        let conflict = engine.last_conflict().await.expect("conflict report recorded");
        assert_eq!(conflict.replayed_letters, 1, "only the orphaned letter-A block should be harvested");
        assert_eq!(conflict.local_height, 2);
        assert_eq!(conflict.remote_height, 3);

        let conflicts_dir = store.conflicts_dir(&genesis_hash);
        assert!(conflicts_dir.exists(), "fork resolution should have snapshotted the losing chain");
    }
}
