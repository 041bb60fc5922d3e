//! Multi-chain directory layout: one subdirectory per genesis hash under a
//! ledger root, with late-bound genesis for bootstrap and legacy migration.
//!
//! Grounded on the write-to-temp-then-rename durability pattern used for
//! block storage elsewhere in the corpus; applied here at the directory
//! level so the genesis rename itself is atomic against concurrent readers.

use std::fs;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use uuid::Uuid;

use crate::block::Block;
use crate::chain::Ledger;
use crate::fsutil;
use crate::LedgerError;

const BLOCKS_FILE: &str = "blocks.json";
const BOOTSTRAP_PREFIX: &str = "bootstrap-";

/// Owns the `<root>/<genesisHash>/` layout; does not track which genesis is
/// currently active — that pointer lives in relay config, per §4.1.
#[derive(Debug, Clone)]
pub struct ChainStore {
    root: PathBuf,
}

impl ChainStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chain_dir(&self, genesis_hash: &str) -> PathBuf {
        self.root.join(genesis_hash)
    }

    /// Where fork-resolution snapshots live for a given chain.
    pub fn conflicts_dir(&self, genesis_hash: &str) -> PathBuf {
        self.chain_dir(genesis_hash).join("conflicts")
    }

    /// Open (or initialize) the chain for a known genesis hash.
    pub fn open(&self, genesis_hash: &str) -> Result<Ledger, LedgerError> {
        Ledger::initialize(self.chain_dir(genesis_hash).join(BLOCKS_FILE))
    }

    /// Start a brand-new chain when the genesis hash is not yet known: write
    /// into a temporary directory, then rename it to the real genesis hash
    /// once the fresh genesis block's hash is computed.
    pub fn bootstrap(&self) -> Result<(Ledger, String), LedgerError> {
        let temp_dir = self.root.join(format!("{BOOTSTRAP_PREFIX}{}", Uuid::new_v4()));
        let ledger = Ledger::initialize(temp_dir.join(BLOCKS_FILE))?;
        let genesis_hash = ledger
            .genesis_hash()
            .expect("a freshly initialized ledger always has a genesis block")
            .to_string();

        let final_dir = self.chain_dir(&genesis_hash);
        if final_dir.exists() {
            // Another caller already bootstrapped this exact genesis; drop
            // our temp copy and open the one that won the race.
            fs::remove_dir_all(&temp_dir)?;
        } else {
            fs::rename(&temp_dir, &final_dir)?;
        }

        Ok((self.open(&genesis_hash)?, genesis_hash))
    }

    /// Move a legacy single-file chain into its genesis-hash subdirectory.
    pub fn migrate_legacy(&self, legacy_file: &Path) -> Result<String, LedgerError> {
        let blocks: Vec<Block> = fsutil::read_json_opt(legacy_file)?.ok_or_else(|| {
            LedgerError::InvariantViolation("legacy chain file is missing or empty".into())
        })?;
        let genesis_hash = blocks
            .first()
            .map(|b| b.hash.clone())
            .ok_or_else(|| LedgerError::InvariantViolation("legacy chain has no genesis block".into()))?;

        let dest = self.chain_dir(&genesis_hash).join(BLOCKS_FILE);
        fsutil::write_json(&dest, &blocks)?;
        fs::remove_file(legacy_file)?;
        Ok(genesis_hash)
    }

    /// Archive the pre-replacement local blocks before a fork-resolution
    /// replace (§4.3 step 1). Failure to snapshot is not fatal to the caller.
    pub fn snapshot_conflict(&self, genesis_hash: &str, blocks: &[Block]) -> Result<PathBuf, LedgerError> {
        let epoch_ms = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let path = self
            .conflicts_dir(genesis_hash)
            .join(format!("blocks-{epoch_ms}.json"));
        fsutil::write_json(&path, blocks)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bootstrap_renames_temp_dir_to_genesis_hash() {
        let dir = tempdir().unwrap();
        let store = ChainStore::new(dir.path());

        let (ledger, genesis_hash) = store.bootstrap().unwrap();

        assert_eq!(ledger.genesis_hash(), Some(genesis_hash.as_str()));
        assert!(dir.path().join(&genesis_hash).join("blocks.json").exists());
        assert_eq!(
            std::fs::read_dir(dir.path())
                .unwrap()
                .filter_map(|e| e.ok())
                .count(),
            1,
            "no leftover bootstrap-* directory"
        );
    }

    #[test]
    fn open_reopens_the_same_chain() {
        let dir = tempdir().unwrap();
        let store = ChainStore::new(dir.path());
        let (_, genesis_hash) = store.bootstrap().unwrap();

        let reopened = store.open(&genesis_hash).unwrap();
        assert_eq!(reopened.genesis_hash(), Some(genesis_hash.as_str()));
    }

    #[test]
    fn migrate_legacy_moves_file_into_genesis_subdirectory() {
        let dir = tempdir().unwrap();
        let store = ChainStore::new(dir.path().join("chains"));
        let legacy_path = dir.path().join("legacy-chain.json");

        let legacy_ledger = Ledger::initialize(&legacy_path).unwrap();
        let genesis_hash = legacy_ledger.genesis_hash().unwrap().to_string();
        drop(legacy_ledger);

        let migrated_hash = store.migrate_legacy(&legacy_path).unwrap();

        assert_eq!(migrated_hash, genesis_hash);
        assert!(!legacy_path.exists());
        assert!(store.open(&genesis_hash).is_ok());
    }

    #[test]
    fn snapshot_conflict_writes_archive_file() {
        let dir = tempdir().unwrap();
        let store = ChainStore::new(dir.path());
        let (ledger, genesis_hash) = store.bootstrap().unwrap();

        let path = store
            .snapshot_conflict(&genesis_hash, ledger.blocks())
            .unwrap();

        assert!(path.exists());
        let restored: Vec<Block> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(restored, ledger.blocks());
    }

    #[test]
    fn snapshot_conflict_file_lives_under_conflicts_dir() {
        let dir = tempdir().unwrap();
        let store = ChainStore::new(dir.path());
        let (ledger, genesis_hash) = store.bootstrap().unwrap();

        let path = store.snapshot_conflict(&genesis_hash, ledger.blocks()).unwrap();
        assert_eq!(path.parent().unwrap(), store.conflicts_dir(&genesis_hash));
    }
}
