//! Crate-wide error taxonomy.
//!
//! This mirrors the taxonomy from the component design rather than naming
//! per-adapter failure types: callers match on the variant, not on which
//! storage backend produced it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Addressed object does not exist at the requested size.
    #[error("not found")]
    NotFound,

    /// Parse failure: checkpoint note, tile bytes, bundle bytes, or URL.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// Checkpoint failed to verify against the configured verifier/origin.
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// Two signed checkpoints commit to different roots at the same size,
    /// or a later size is inconsistent with an earlier one.
    #[error("fork detected: {0}")]
    ForkDetected(String),

    /// Backpressure is active; the caller should not retry immediately.
    #[error("overloaded")]
    Overloaded,

    /// Storage-level write conflict. Safe to retry once at the next batch
    /// boundary.
    #[error("storage conflict")]
    Conflict,

    /// Invariant violation, schema mismatch, or corrupt data. Never retried.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The component is shutting down and refuses new work.
    #[error("shutting down")]
    ShuttingDown,

    /// The caller's context was cancelled before its batch committed.
    #[error("cancelled")]
    Cancelled,

    /// The batch this entry belonged to failed to integrate.
    #[error("integrator failed: {0}")]
    IntegratorFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors the sequencer may re-enqueue the batch for; `Fatal`
    /// is explicitly excluded per the propagation rules in the design.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
