//! Checkpoint publisher (§4.3): wakes on an integration signal or a
//! periodic ticker, rate-limits against `CheckpointInterval`, and signs the
//! current tree state into a replacement `Checkpoint` row.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::integrator;
use crate::shutdown::ShutdownSignal;
use crate::signer::{format_checkpoint, Signer};
use crate::storage::{Checkpoint, Storage};

pub struct Publisher {
    storage: Arc<dyn Storage>,
    origin: String,
    primary: Arc<dyn Signer>,
    additional: Vec<Arc<dyn Signer>>,
    interval: Duration,
}

impl Publisher {
    /// `interval` below 1 second is rejected per §4.3.
    pub fn new(
        storage: Arc<dyn Storage>,
        origin: impl Into<String>,
        primary: Arc<dyn Signer>,
        additional: Vec<Arc<dyn Signer>>,
        interval: Duration,
    ) -> Result<Self> {
        if interval < Duration::from_secs(1) {
            return Err(Error::Fatal("CheckpointInterval must be at least 1 second".into()));
        }
        Ok(Self {
            storage,
            origin: origin.into(),
            primary,
            additional,
            interval,
        })
    }

    /// Runs the wake-and-publish loop until `shutdown` fires. `integrated`
    /// is the sequencer's "a batch just committed" signal; the periodic
    /// ticker backs up checkpoint freshness even with no new integrations.
    pub fn spawn(self: Arc<Self>, mut integrated: watch::Receiver<u64>, mut shutdown: ShutdownSignal) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(self.interval) => {}
                    changed = integrated.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                if let Err(err) = self.publish_if_due().await {
                    tracing::warn!(error = %err, "checkpoint publish failed, retrying next tick");
                }
            }
        });
    }

    /// Publishes the current `(size, root)` as a fresh signed checkpoint,
    /// unless the previous publish happened less than `interval` ago.
    #[tracing::instrument(skip(self))]
    pub async fn publish_if_due(&self) -> Result<()> {
        let now = Utc::now();
        if let Ok(existing) = self.storage.read_checkpoint().await {
            let elapsed = now.signed_duration_since(existing.published_at);
            if elapsed < chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::zero()) {
                return Ok(());
            }
        }

        let size = self.storage.integrated_size().await?;
        let root = integrator::root_at(self.storage.as_ref(), size).await?;
        let additional: Vec<&dyn Signer> = self.additional.iter().map(AsRef::as_ref).collect();
        let note = format_checkpoint(&self.origin, size, root, self.primary.as_ref(), &additional);

        tracing::info!(size, root = %root, signers = self.additional.len() + 1, "publishing checkpoint");
        let mut tx = self.storage.begin().await?;
        tx.write_checkpoint(Checkpoint {
            note,
            published_at: now,
        })
        .await?;
        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::hash;
    use crate::integrator as integrator_mod;
    use crate::signer::{parse_checkpoint, Ed25519Signer};
    use crate::storage::memory::MemoryStorage;
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    fn test_signer() -> Arc<dyn Signer> {
        Arc::new(Ed25519Signer::new("primary", SigningKey::generate(&mut OsRng)))
    }

    #[tokio::test]
    async fn s1_empty_tree_checkpoint() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let publisher =
            Publisher::new(Arc::clone(&storage), "example/log", test_signer(), vec![], Duration::from_secs(1)).unwrap();
        publisher.publish_if_due().await.unwrap();

        let checkpoint = storage.read_checkpoint().await.unwrap();
        let parsed = parse_checkpoint(&checkpoint.note).unwrap();
        assert_eq!(parsed.size, 0);
        assert_eq!(parsed.root, hash::empty_root());
    }

    #[tokio::test]
    async fn publishing_twice_within_interval_leaves_checkpoint_unchanged() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let publisher = Publisher::new(
            Arc::clone(&storage),
            "example/log",
            test_signer(),
            vec![],
            Duration::from_secs(60),
        )
        .unwrap();

        publisher.publish_if_due().await.unwrap();
        let first = storage.read_checkpoint().await.unwrap();

        integrator_mod::integrate(storage.as_ref(), &[Entry::new(&b"x"[..])])
            .await
            .unwrap();
        publisher.publish_if_due().await.unwrap();
        let second = storage.read_checkpoint().await.unwrap();

        assert_eq!(first.note, second.note);
        assert_eq!(first.published_at, second.published_at);
    }

    #[tokio::test]
    async fn rejects_sub_second_interval() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        assert!(Publisher::new(storage, "o", test_signer(), vec![], Duration::from_millis(500)).is_err());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn publish_logs_the_new_size_and_root() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let publisher =
            Publisher::new(Arc::clone(&storage), "example/log", test_signer(), vec![], Duration::from_secs(1)).unwrap();
        publisher.publish_if_due().await.unwrap();
        assert!(logs_contain("publishing checkpoint"));
    }
}
