//! Shared scenario-test scaffolding: wires the sequencer, integrator-backed
//! storage, antispam follower, and checkpoint publisher together the same
//! way `App::bootstrap` does, minus the HTTP layer and file-backed config,
//! so each scenario test drives the real end-to-end pipeline rather than
//! one module in isolation.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use tlog_sequencer::follower::{Antispam, Follower};
use tlog_sequencer::metrics::Metrics;
use tlog_sequencer::publisher::Publisher;
use tlog_sequencer::sequencer::{self, SequencerHandle};
use tlog_sequencer::shutdown::Shutdown;
use tlog_sequencer::signer::{Ed25519Signer, Signer};
use tlog_sequencer::storage::memory::MemoryStorage;
use tlog_sequencer::storage::Storage;

pub struct Harness {
    pub storage: Arc<dyn Storage>,
    pub sequencer: SequencerHandle,
    pub follower: Arc<Follower>,
    pub publisher: Arc<Publisher>,
    pub shutdown: Shutdown,
}

impl Harness {
    /// Spawns a full pipeline: `pushback_threshold` and `checkpoint_interval`
    /// are the two knobs scenario tests vary; batch thresholds are kept
    /// generous so admissions flush promptly without a test having to tune
    /// them.
    pub fn spawn(pushback_threshold: u64, checkpoint_interval: Duration) -> Self {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let shutdown = Shutdown::new();
        let metrics = Arc::new(Metrics::new());

        let follower = Follower::spawn(
            Arc::clone(&storage),
            pushback_threshold,
            Duration::from_millis(20),
            Arc::clone(&metrics),
            shutdown.signal(),
        );
        let antispam: Arc<dyn Antispam> = Arc::clone(&follower) as Arc<dyn Antispam>;

        let (sequencer, integrated_rx) = sequencer::spawn(
            Arc::clone(&storage),
            Some(antispam),
            Arc::clone(&metrics),
            64,
            Duration::from_millis(20),
            shutdown.signal(),
        );

        let signer: Arc<dyn Signer> = Arc::new(Ed25519Signer::new("primary", SigningKey::generate(&mut OsRng)));
        let publisher = Arc::new(
            Publisher::new(Arc::clone(&storage), "example.com/log", signer, vec![], checkpoint_interval)
                .expect("checkpoint interval is valid in every scenario test"),
        );
        publisher.clone().spawn(integrated_rx, shutdown.signal());

        Self {
            storage,
            sequencer,
            follower,
            publisher,
            shutdown,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition did not become true within 5s");
}
