//! Wires the sequencer, integrator-backed storage, antispam follower, and
//! checkpoint publisher into one running service, behind the `Arc<App>`
//! state every HTTP handler closes over.

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::SigningKey;
use zeroize::Zeroize;

use crate::config::Config;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::follower::{Antispam, Follower};
use crate::metrics::Metrics;
use crate::publisher::Publisher;
use crate::sequencer::{self, SequencerHandle};
use crate::shutdown::Shutdown;
use crate::signer::{Ed25519Signer, Signer};
use crate::storage::fs::FsStorage;
use crate::storage::Storage;

pub struct App {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub sequencer: SequencerHandle,
    pub follower: Arc<Follower>,
    pub metrics: Arc<Metrics>,
    pub shutdown: Shutdown,
}

impl App {
    /// Writes the compatibility row and an empty tree state to a fresh
    /// storage root; run once before the first `serve`.
    pub async fn init_storage(storage_root: &Path) -> Result<()> {
        FsStorage::init(storage_root).await?;
        Ok(())
    }

    /// Opens the storage root and spawns every long-running task (sequencer
    /// batching loop, antispam follower, checkpoint publisher).
    pub async fn bootstrap(config: Config) -> Result<Arc<Self>> {
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::open(&config.storage_root).await?);
        let shutdown = Shutdown::new();
        let metrics = Arc::new(Metrics::new());

        let follower = Follower::spawn(
            Arc::clone(&storage),
            config.pushback_threshold,
            config.follower_poll_interval,
            Arc::clone(&metrics),
            shutdown.signal(),
        );
        let antispam: Arc<dyn Antispam> = Arc::clone(&follower) as Arc<dyn Antispam>;

        let (handle, integrated_rx) = sequencer::spawn(
            Arc::clone(&storage),
            Some(antispam),
            Arc::clone(&metrics),
            config.batch_max_size,
            config.batch_max_age,
            shutdown.signal(),
        );

        let primary = Arc::new(load_signer(&config.signer_key_path)?);
        let mut additional: Vec<Arc<dyn Signer>> = Vec::new();
        for path in &config.additional_signer_key_paths {
            additional.push(Arc::new(load_signer(path)?));
        }
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&storage),
            config.origin.clone(),
            primary,
            additional,
            config.checkpoint_interval,
        )?);
        publisher.spawn(integrated_rx, shutdown.signal());

        Ok(Arc::new(Self {
            config,
            storage,
            sequencer: handle,
            follower,
            metrics,
            shutdown,
        }))
    }

    /// `POST /add`: submits one entry, returning its assigned index.
    pub async fn add(&self, payload: Vec<u8>) -> Result<(u64, bool)> {
        self.sequencer.add(Entry::new(payload)).await
    }
}

/// Loads an `ed25519-dalek` signing key from a file holding its 32-byte seed,
/// base64-encoded. The signer's name is the file's stem, e.g. `primary.key`
/// signs as `primary`.
fn load_signer(path: &Path) -> Result<Ed25519Signer> {
    let mut contents = std::fs::read_to_string(path)?;
    let decode_result = BASE64
        .decode(contents.trim())
        .map_err(|e| Error::Fatal(format!("signer key {}: {e}", path.display())));
    contents.zeroize();
    let mut decoded = decode_result?;
    let seed: [u8; 32] = decoded
        .as_slice()
        .try_into()
        .map_err(|_| Error::Fatal(format!("signer key {} is not 32 bytes", path.display())))?;
    let key = SigningKey::from_bytes(&seed);
    decoded.zeroize();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "signer".to_string());
    Ok(Ed25519Signer::new(name, key))
}
