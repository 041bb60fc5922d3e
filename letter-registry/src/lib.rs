//! Directory-side relay registry, canonical manifest, and relay selector.
//!
//! `letter-ledger` owns per-relay chain storage; this crate owns the
//! directory's view *of* relays — who they are, how fresh their chains are,
//! and which one a peer should pick to sync against or submit through.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod fsutil;
mod probe;
mod registry;
mod selector;

pub use probe::{NetworkErrorKind, ProbeOutcome};
pub use registry::{HeartbeatPayload, RelayCandidate, RelayRecord, Registry, SyncStatus};
pub use selector::{score, select_best, Candidate, SelectorInput};

use thiserror::Error;

/// Errors from registry persistence and lookups.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Underlying filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted JSON was malformed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
