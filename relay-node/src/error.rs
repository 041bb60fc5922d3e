//! The §7 error taxonomy, realized as two small enums: `PipelineError` is
//! what `AcceptLetter` resolves its waiter with, `SyncError` is what the
//! sync engine returns to its caller (the write pipeline or the sync timer).
//! Only `http.rs` ever turns one of these into an HTTP status code.

use thiserror::Error;

/// Errors an enqueued letter can fail with.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// Missing or malformed request fields.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A ledger invariant was violated; never silently repaired.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// Filesystem or network glitch; safe to retry.
    #[error("transient I/O error: {0}")]
    TransientIo(String),
    /// Pre-write sync refused the write.
    #[error("sync blocked: {0}")]
    SyncBlocked(String),
    /// The queue was cleared, or the relay is shutting down.
    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Retryable errors are kept at the head of the queue and retried after
    /// a backoff; non-retryable errors are shifted off and reported.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::TransientIo(_) | PipelineError::SyncBlocked(_))
    }

    /// HTTP status for `POST /api/letters` (§6.1, §7).
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::InvalidInput(_) => 400,
            PipelineError::TransientIo(_) | PipelineError::SyncBlocked(_) => 503,
            PipelineError::InvariantViolation(_) | PipelineError::Cancelled => 500,
        }
    }
}

impl From<letter_ledger::LedgerError> for PipelineError {
    fn from(err: letter_ledger::LedgerError) -> Self {
        match err {
            letter_ledger::LedgerError::Io(e) => PipelineError::TransientIo(e.to_string()),
            letter_ledger::LedgerError::Serde(e) => PipelineError::TransientIo(e.to_string()),
            letter_ledger::LedgerError::Atom(e) => PipelineError::InvariantViolation(e.to_string()),
            letter_ledger::LedgerError::InvalidChain(reason) => PipelineError::InvariantViolation(reason),
            letter_ledger::LedgerError::InvariantViolation(reason) => {
                PipelineError::InvariantViolation(reason)
            }
        }
    }
}

/// Outcome of one pre-write-sync invocation (§4.3 "Pre-write sync semantics").
#[derive(Debug, Clone)]
pub enum PreWriteSyncOutcome {
    /// Nothing was done; `reason` decides whether the caller proceeds.
    Skipped { reason: String },
    /// The sync engine ran a full compare/fetch/resolve cycle.
    Performed(letter_ledger::SyncOutcome),
}

/// The one bypass reason bootstrap relies on (§9 Design Notes): a relay
/// with no peers yet may still accept writes.
pub const NO_ALTERNATE_RELAY: &str = "No alternate relay available";
/// The other documented skip reason, always retryable.
pub const NO_DIRECTORY_CONFIGURED: &str = "No directory configured";

/// Errors from the sync engine's network legs (peer fetch, directory query).
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Transport-level failure talking to the directory or a peer.
    #[error("sync transport error: {0}")]
    Transport(String),
    /// The ledger rejected a candidate remote chain.
    #[error("remote chain invalid: {0}")]
    InvalidRemote(String),
}

impl From<SyncError> for PipelineError {
    fn from(err: SyncError) -> Self {
        PipelineError::TransientIo(err.to_string())
    }
}
