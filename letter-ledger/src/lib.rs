//! Append-only, hash-linked, content-addressed letter ledger.
//!
//! A ledger is a chain of [`Block`]s rooted at a genesis block; multiple
//! chains (keyed by genesis hash) can live side by side under one
//! [`ChainStore`] root, with exactly one active per relay. Letters awaiting
//! commit live in a [`PendingQueue`] until the write pipeline (relay-node)
//! drains them one at a time.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod chain;
mod fsutil;
mod pending;
mod store;

pub use block::{now_iso8601, validate_chain, Block, ChainManifest, LetterEntry, ValidationResult};
pub use chain::{compare_chains, ChainComparison, Ledger, SyncOutcome};
pub use pending::{PendingEntry, PendingQueue};
pub use store::ChainStore;

use thiserror::Error;

/// Errors surfaced by ledger operations.
///
/// `InvalidChain` and `InvariantViolation` are non-retryable; `Io` is
/// surfaced unchanged for the write pipeline (§4.2) to classify.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Underlying filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted JSON was malformed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Canonicalization/hashing failed.
    #[error("canonicalization error: {0}")]
    Atom(#[from] letter_atom::AtomError),

    /// A chain failed `ValidateChain`.
    #[error("chain validation failed: {0}")]
    InvalidChain(String),

    /// A precondition the ledger guarantees was violated.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
