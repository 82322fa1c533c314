//! Sequencer (§4.1): batches concurrent `Add` calls by count or age and
//! hands each batch to the integrator, resolving one future per caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::follower::Antispam;
use crate::integrator;
use crate::metrics::Metrics;
use crate::shutdown::ShutdownSignal;
use crate::storage::Storage;

struct Queued {
    entry: Entry,
    respond: oneshot::Sender<Result<(u64, bool)>>,
}

/// The producer-facing side of the sequencer; cheap to clone (an mpsc
/// sender plus an `Arc` to the optional antispam front layer).
#[derive(Clone)]
pub struct SequencerHandle {
    tx: mpsc::Sender<Queued>,
    antispam: Option<Arc<dyn Antispam>>,
}

impl SequencerHandle {
    /// `Add(entry) -> (index, is_duplicate)`. Resolves after the batch
    /// containing this entry commits, or short-circuits via the dedup
    /// front layer if `leafHash` is already indexed. Never cancels early;
    /// use [`SequencerHandle::add_cancellable`] for a caller with its own
    /// cancellation context.
    pub async fn add(&self, entry: Entry) -> Result<(u64, bool)> {
        self.add_cancellable(entry, std::future::pending()).await
    }

    /// Same contract as [`SequencerHandle::add`], except that if `cancel`
    /// resolves before the batch containing `entry` commits, this returns
    /// `Err(Error::Cancelled)` immediately. The entry is not pulled back out
    /// of its batch: once queued it is already committed to being assigned
    /// an index if that batch goes on to commit, whether or not this caller
    /// is still waiting.
    pub async fn add_cancellable(
        &self,
        entry: Entry,
        cancel: impl std::future::Future<Output = ()>,
    ) -> Result<(u64, bool)> {
        if let Some(antispam) = &self.antispam {
            if antispam.is_overloaded() {
                return Err(Error::Overloaded);
            }
            if let Some(index) = antispam.lookup(entry.leaf_hash()).await {
                return Ok((index, true));
            }
        }

        let (respond, recv) = oneshot::channel();
        self.tx
            .send(Queued { entry, respond })
            .await
            .map_err(|_| Error::ShuttingDown)?;
        tokio::select! {
            result = recv => result.map_err(|_| Error::ShuttingDown)?,
            () = cancel => Err(Error::Cancelled),
        }
    }
}

/// A caller-owned cancellation context for one [`SequencerHandle::add_cancellable`]
/// call, the same `watch`-based shape as [`crate::shutdown::Shutdown`] but
/// scoped to a single request instead of the whole process.
pub struct Cancellation {
    tx: watch::Sender<bool>,
}

/// A cheaply cloneable handle a caller passes into `add_cancellable`.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Marks every outstanding and future [`CancelSignal`] as cancelled.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// Resolves once [`Cancellation::cancel`] has been called. Safe to
    /// await repeatedly and to select! against.
    pub async fn cancelled(self) {
        let mut rx = self.rx;
        let _ = rx.wait_for(|v| *v).await;
    }
}

/// Spawns the batching loop. Returns the producer handle plus a
/// `watch::Receiver` the checkpoint publisher listens on for "a new size
/// was just committed" wakeups.
pub fn spawn(
    storage: Arc<dyn Storage>,
    antispam: Option<Arc<dyn Antispam>>,
    metrics: Arc<Metrics>,
    batch_max_size: usize,
    batch_max_age: Duration,
    mut shutdown: ShutdownSignal,
) -> (SequencerHandle, watch::Receiver<u64>) {
    assert!(batch_max_size > 0, "BatchMaxSize must be > 0");
    let (tx, mut rx) = mpsc::channel::<Queued>(4 * batch_max_size);
    let (integrated_tx, integrated_rx) = watch::channel(0u64);

    tokio::spawn(async move {
        loop {
            let first = tokio::select! {
                () = shutdown.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            metrics.queue_depth.set(i64::try_from(rx.len()).unwrap_or(i64::MAX));

            let mut batch = vec![first];
            let deadline = tokio::time::sleep(batch_max_age);
            tokio::pin!(deadline);
            while batch.len() < batch_max_size {
                tokio::select! {
                    () = &mut deadline => break,
                    () = shutdown.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(item) => batch.push(item),
                        None => break,
                    },
                }
            }
            metrics.batch_size.observe(batch.len() as f64);

            let entries: Vec<Entry> = batch.iter().map(|q| q.entry.clone()).collect();
            let started = std::time::Instant::now();
            #[allow(clippy::cast_possible_truncation)]
            let mut result = integrator::integrate(storage.as_ref(), &entries).await;
            // §7: a storage-level `Conflict` is safe to retry once at the
            // next batch boundary, since the batch's input bytes and prior
            // size are unchanged; anything else (in particular `Fatal`) is
            // surfaced to every caller in the batch.
            if let Err(err) = &result {
                if err.is_retryable() {
                    tracing::warn!(error = %err, "integration conflict, retrying batch once");
                    result = integrator::integrate(storage.as_ref(), &entries).await;
                }
            }
            match result {
                Ok((new_size, _root)) => {
                    metrics.integration_latency_seconds.observe(started.elapsed().as_secs_f64());
                    let start = new_size - entries.len() as u64;
                    for (offset, item) in batch.into_iter().enumerate() {
                        let _ = item.respond.send(Ok((start + offset as u64, false)));
                    }
                    let _ = integrated_tx.send(new_size);
                }
                Err(err) => {
                    for item in batch {
                        let _ = item.respond.send(Err(Error::IntegratorFailed(err.to_string())));
                    }
                }
            }
        }

        while let Ok(item) = rx.try_recv() {
            let _ = item.respond.send(Err(Error::ShuttingDown));
        }
    });

    (SequencerHandle { tx, antispam }, integrated_rx)
}
