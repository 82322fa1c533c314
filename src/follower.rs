//! Antispam follower (§4.6): streams committed entry bundles in order,
//! maintaining a `leafHash -> firstIndex` index and a pushback flag the
//! sequencer consults before admitting new entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::hash::NodeHash;
use crate::layout;
use crate::metrics::Metrics;
use crate::shutdown::ShutdownSignal;
use crate::storage::Storage;

/// The sequencer's view of the follower: dedup lookups and the pushback
/// flag. Kept as a trait so the sequencer doesn't need a concrete
/// [`Follower`] to be testable in isolation.
#[async_trait]
pub trait Antispam: Send + Sync {
    async fn lookup(&self, hash: NodeHash) -> Option<u64>;
    fn is_overloaded(&self) -> bool;
}

pub struct Follower {
    storage: Arc<dyn Storage>,
    position: AtomicU64,
    index: RwLock<HashMap<NodeHash, u64>>,
    pushback: AtomicBool,
    pushback_threshold: u64,
    metrics: Arc<Metrics>,
}

impl Follower {
    /// Spawns the follower's poll loop and returns the shared handle the
    /// sequencer consults for dedup and pushback.
    #[must_use]
    pub fn spawn(
        storage: Arc<dyn Storage>,
        pushback_threshold: u64,
        poll_interval: Duration,
        metrics: Arc<Metrics>,
        mut shutdown: ShutdownSignal,
    ) -> Arc<Self> {
        let follower = Arc::new(Self {
            storage,
            position: AtomicU64::new(0),
            index: RwLock::new(HashMap::new()),
            pushback: AtomicBool::new(false),
            pushback_threshold,
            metrics,
        });

        let task_follower = Arc::clone(&follower);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(poll_interval) => {}
                }
                match task_follower.catch_up().await {
                    Ok(()) => {}
                    Err(Error::Fatal(msg)) => {
                        tracing::error!(error = %msg, "antispam follower: fatal, stopping");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "antispam follower: transient error, retrying");
                    }
                }
            }
        });

        follower
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Reads bundles from the current cursor up to the integrated size,
    /// inserting every newly observed leaf hash (keeping the minimum
    /// index) and advancing the cursor past each fully processed bundle.
    #[tracing::instrument(skip(self))]
    async fn catch_up(&self) -> Result<()> {
        let size = self.storage.integrated_size().await?;
        let mut p = self.position();

        while p < size {
            let bundle_idx = layout::bundle_index(p);
            let requested = layout::partial_bundle_size(bundle_idx, size);
            let bundle = match self.storage.read_entry_bundle(bundle_idx, requested).await {
                Ok(bundle) => bundle,
                Err(Error::Malformed(msg)) => {
                    return Err(Error::Fatal(format!("corrupt entry bundle {bundle_idx}: {msg}")));
                }
                Err(other) => return Err(other),
            };

            let base = bundle_idx * layout::ENTRY_BUNDLE_WIDTH;
            let hashes = bundle.leaf_hashes();
            {
                let mut index = self.index.write().await;
                for (offset, hash) in hashes.iter().enumerate() {
                    let idx = base + offset as u64;
                    if idx < p {
                        continue;
                    }
                    index.entry(*hash).or_insert(idx);
                }
            }
            p = base + hashes.len() as u64;
            self.position.store(p, Ordering::Release);
        }

        let lag = size.saturating_sub(p);
        self.metrics.follower_lag.set(i64::try_from(lag).unwrap_or(i64::MAX));
        self.pushback.store(lag > self.pushback_threshold, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl Antispam for Follower {
    async fn lookup(&self, hash: NodeHash) -> Option<u64> {
        self.index.read().await.get(&hash).copied()
    }

    fn is_overloaded(&self) -> bool {
        self.pushback.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::integrator;
    use crate::shutdown::Shutdown;
    use crate::storage::memory::MemoryStorage;
    use std::time::Duration;

    #[tokio::test]
    async fn catches_up_and_resolves_dedup_lookups() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let entries: Vec<Entry> = (0..10u8).map(|i| Entry::new(vec![i])).collect();
        integrator::integrate(storage.as_ref(), &entries).await.unwrap();

        let shutdown = Shutdown::new();
        let follower = Follower::spawn(Arc::clone(&storage), 1000, Duration::from_millis(20), Arc::new(Metrics::new()), shutdown.signal());

        wait_until(|| follower.position() == 10).await;
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(follower.lookup(entry.leaf_hash()).await, Some(i as u64));
        }
        shutdown.trigger();
    }

    #[tokio::test]
    async fn duplicate_hash_keeps_the_lowest_index() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let entries = vec![Entry::new(&b"same"[..]), Entry::new(&b"same"[..])];
        integrator::integrate(storage.as_ref(), &entries).await.unwrap();

        let shutdown = Shutdown::new();
        let follower = Follower::spawn(Arc::clone(&storage), 1000, Duration::from_millis(20), Arc::new(Metrics::new()), shutdown.signal());
        wait_until(|| follower.position() == 2).await;

        assert_eq!(follower.lookup(entries[0].leaf_hash()).await, Some(0));
        shutdown.trigger();
    }

    #[tokio::test]
    async fn pushback_sets_and_clears_with_lag() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let entries: Vec<Entry> = (0..3u8).map(|i| Entry::new(vec![i])).collect();
        integrator::integrate(storage.as_ref(), &entries).await.unwrap();

        let shutdown = Shutdown::new();
        let follower = Follower::spawn(Arc::clone(&storage), 1, Duration::from_millis(20), Arc::new(Metrics::new()), shutdown.signal());

        wait_until(|| follower.position() == 3).await;
        // S6: threshold=1, three entries committed before the follower starts
        // catching up; it clears pushback once p reaches size.
        wait_until(|| !follower.is_overloaded()).await;
        shutdown.trigger();
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition did not become true within 5s");
    }
}
