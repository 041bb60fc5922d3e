//! The active chain for one genesis: the `Ledger` itself, plus the pure
//! chain-comparison logic the sync engine (relay-node) drives.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::block::{now_iso8601, validate_chain, Block, ChainManifest, LetterEntry, ValidationResult};
use crate::fsutil;
use crate::LedgerError;

/// Outcome of a `sync_from_remote` call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncOutcome {
    pub updated: bool,
    pub message: String,
}

/// Where a local/remote chain pair stand relative to one another (§4.3
/// Conflict detection). Pure function of the two block lists — no I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainComparison {
    /// Remote is not longer than local; nothing to do.
    UpToDate,
    /// Remote shares every local block and extends past it.
    CleanExtension,
    /// Histories diverge and remote is at least as long: local must yield.
    ForkLocalLoses { diverge_at: usize },
    /// Histories diverge but remote is shorter: ignore remote.
    ForkRemoteLoses { diverge_at: usize },
}

/// Walk `local` and `remote` in lock-step and classify their relationship.
pub fn compare_chains(local: &[Block], remote: &[Block]) -> ChainComparison {
    let shared_len = local.len().min(remote.len());
    let diverge_at = (0..shared_len).find(|&i| local[i].hash != remote[i].hash);

    match diverge_at {
        None if remote.len() > local.len() => ChainComparison::CleanExtension,
        None => ChainComparison::UpToDate,
        Some(d) if remote.len() >= local.len() => ChainComparison::ForkLocalLoses { diverge_at: d },
        Some(d) => ChainComparison::ForkRemoteLoses { diverge_at: d },
    }
}

/// One active chain, persisted as a single JSON array of blocks.
///
/// Append is atomic at the file level: every mutation goes through
/// [`fsutil::atomic_write`], so a crash mid-write leaves the previous valid
/// chain in place rather than a truncated one.
#[derive(Debug)]
pub struct Ledger {
    blocks: Vec<Block>,
    path: PathBuf,
}

impl Ledger {
    /// Ensure the chain file at `path` exists; if empty, write a genesis block.
    pub fn initialize(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let existing: Option<Vec<Block>> = fsutil::read_json_opt(&path)?;

        match existing {
            Some(blocks) if !blocks.is_empty() => Ok(Self { blocks, path }),
            _ => {
                let genesis = Block::genesis(now_iso8601())?;
                let ledger = Self {
                    blocks: vec![genesis],
                    path,
                };
                ledger.persist()?;
                Ok(ledger)
            }
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hash of the genesis block — the chain's stable identity.
    pub fn genesis_hash(&self) -> Option<&str> {
        self.blocks.first().map(|b| b.hash.as_str())
    }

    pub fn last(&self) -> &Block {
        self.blocks
            .last()
            .expect("a ledger always has at least a genesis block")
    }

    /// Build a single-letter block on top of the active chain and persist it.
    pub fn append_letter_block(
        &mut self,
        letter: LetterEntry,
        relay_metrics: Value,
        summary: impl Into<String>,
    ) -> Result<Block, LedgerError> {
        let block = Block::next(self.last(), now_iso8601(), letter, relay_metrics, summary.into())?;
        self.blocks.push(block.clone());
        self.persist()?;
        Ok(block)
    }

    pub fn validate(&self) -> Result<ValidationResult, LedgerError> {
        validate_chain(&self.blocks)
    }

    pub fn manifest(&self) -> Result<ChainManifest, LedgerError> {
        ChainManifest::from_blocks(&self.blocks)
    }

    /// Replace the local chain with `remote_blocks` if it validates and
    /// (absent `force`) is strictly longer than the current chain.
    pub fn sync_from_remote(
        &mut self,
        remote_blocks: Vec<Block>,
        force: bool,
    ) -> Result<SyncOutcome, LedgerError> {
        if remote_blocks.is_empty() {
            return Ok(SyncOutcome {
                updated: false,
                message: "remote chain is empty".into(),
            });
        }

        let validation = validate_chain(&remote_blocks)?;
        if !validation.ok {
            return Err(LedgerError::InvalidChain(
                validation
                    .reason
                    .unwrap_or_else(|| "remote chain failed validation".into()),
            ));
        }

        if !force && remote_blocks.len() <= self.blocks.len() {
            return Ok(SyncOutcome {
                updated: false,
                message: "local chain is already at least as long as remote".into(),
            });
        }

        self.blocks = remote_blocks;
        self.persist()?;
        Ok(SyncOutcome {
            updated: true,
            message: "local chain replaced from remote".into(),
        })
    }

    /// All (block, letter) pairs owned by `fingerprint`, in chain order.
    pub fn find_letters_by_fingerprint<'a>(
        &'a self,
        fingerprint: &str,
    ) -> Vec<(&'a Block, &'a LetterEntry)> {
        self.blocks
            .iter()
            .flat_map(|b| b.letters.iter().map(move |l| (b, l)))
            .filter(|(_, l)| l.owner_fingerprint == fingerprint)
            .collect()
    }

    fn persist(&self) -> Result<(), LedgerError> {
        fsutil::write_json(&self.path, &self.blocks)
    }
}
