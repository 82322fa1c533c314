//! Log-state tracker (§4.5): the reader-side component that fetches
//! checkpoints, verifies their signatures and origin, and enforces
//! consistency against whatever checkpoint it last trusted.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hash::NodeHash;
use crate::proof::ProofBuilder;
use crate::signer::{parse_checkpoint, Verifier};
use crate::storage::Storage;

#[derive(Clone)]
struct TrackedState {
    size: u64,
    root: NodeHash,
    note: Vec<u8>,
}

/// Tracks one log's verified state across repeated [`LogStateTracker::update`]
/// calls. Not `Send`-constrained beyond what `Storage` requires, so it can
/// wrap either a local adapter (as in this crate's tests) or a thin client
/// that fetches tiles over HTTP.
pub struct LogStateTracker<'s> {
    storage: &'s dyn Storage,
    origin: String,
    verifiers: Vec<Arc<dyn Verifier>>,
    state: Option<TrackedState>,
}

impl<'s> LogStateTracker<'s> {
    #[must_use]
    pub fn new(storage: &'s dyn Storage, origin: impl Into<String>, verifiers: Vec<Arc<dyn Verifier>>) -> Self {
        Self {
            storage,
            origin: origin.into(),
            verifiers,
            state: None,
        }
    }

    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.size)
    }

    #[must_use]
    pub fn root(&self) -> Option<NodeHash> {
        self.state.as_ref().map(|s| s.root)
    }

    /// A [`ProofBuilder`] at the currently trusted size, for inclusion and
    /// consistency checks against data the caller fetches separately.
    pub fn proof_builder(&self) -> Result<ProofBuilder<'s>> {
        let size = self.size().ok_or(Error::NotFound)?;
        Ok(ProofBuilder::new(self.storage, size))
    }

    /// Fetches the current checkpoint, verifies it, and — if its size grew —
    /// checks consistency against the previously trusted checkpoint.
    /// Returns the checkpoint note bytes now considered current.
    pub async fn update(&mut self) -> Result<Vec<u8>> {
        let checkpoint = self.storage.read_checkpoint().await?;
        let parsed = parse_checkpoint(&checkpoint.note)?;
        if parsed.origin != self.origin {
            return Err(Error::SignatureInvalid(format!(
                "checkpoint origin {:?} does not match configured origin {:?}",
                parsed.origin, self.origin
            )));
        }
        let verifiers: Vec<&dyn Verifier> = self.verifiers.iter().map(AsRef::as_ref).collect();
        parsed.verify(&verifiers)?;

        if let Some(prev) = self.state.clone() {
            if parsed.size < prev.size {
                return Ok(prev.note);
            }
            if parsed.size == prev.size {
                if parsed.root != prev.root {
                    return Err(Error::ForkDetected(format!(
                        "two checkpoints at size {} commit to different roots",
                        parsed.size
                    )));
                }
                self.state = Some(TrackedState {
                    size: parsed.size,
                    root: parsed.root,
                    note: checkpoint.note.clone(),
                });
                return Ok(checkpoint.note);
            }
            let builder = ProofBuilder::new(self.storage, parsed.size);
            builder.verify_consistency(prev.size, prev.root).await?;
        }

        self.state = Some(TrackedState {
            size: parsed.size,
            root: parsed.root,
            note: checkpoint.note.clone(),
        });
        Ok(checkpoint.note)
    }
}
