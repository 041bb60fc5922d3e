//! Shared process state: everything the HTTP handlers and background loops
//! reach into, assembled once in `main` and handed around as one `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use letter_ledger::{ChainStore, Ledger};
use tokio::sync::Mutex;

use crate::config::RelayConfig;
use crate::directory_client::DirectoryClient;
use crate::heartbeat::Reporter;
use crate::identity::RelayIdentity;
use crate::pipeline::PipelineHandle;
use crate::sync::SyncEngine;

/// Handed to every axum handler as `State<Arc<RelayState>>`.
pub struct RelayState {
    pub config: Arc<Mutex<RelayConfig>>,
    pub config_path: PathBuf,
    pub identity: RelayIdentity,
    pub chain_store: ChainStore,
    pub ledger: Arc<Mutex<Ledger>>,
    pub pipeline: PipelineHandle,
    pub sync_engine: Arc<SyncEngine>,
    pub reporter: Arc<Reporter>,
    pub directory: Arc<DirectoryClient>,
}
