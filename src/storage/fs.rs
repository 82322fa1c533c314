//! Filesystem [`Storage`] adapter.
//!
//! Atomicity is approximated with a temp-file-then-rename dance: every
//! object is written to a temp file next to its destination, then renamed
//! into place. A single
//! mutex serializes the tree-state mutation path (the transaction); readers
//! are not blocked by it and must tolerate a tile or bundle being briefly
//! absent between the writes of one commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::entry::EntryBundle;
use crate::error::{Error, Result};
use crate::hash::NodeHash;
use crate::layout::{self, TileId};
use crate::tile::HashTile;

use super::{Checkpoint, Storage, Transaction, TreeState};

pub struct FsStorage {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

#[derive(Serialize, Deserialize)]
struct TreeStateFile {
    size: u64,
    root: NodeHash,
}

#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    #[serde(with = "base64_bytes")]
    note: Vec<u8>,
    published_at: DateTime<Utc>,
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

impl FsStorage {
    /// Opens (without creating) a storage root. Callers should run
    /// [`FsStorage::init`] once against a fresh directory before serving.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let compat = root.join("compatibility");
        let raw = fs::read(&compat).await.map_err(|_| Error::NotFound)?;
        let version: u32 = std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| Error::Fatal("unparseable compatibility marker".into()))?;
        if version != super::COMPATIBILITY_VERSION {
            return Err(Error::Fatal(format!(
                "storage root compatibility version {version} != {}",
                super::COMPATIBILITY_VERSION
            )));
        }
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Initializes a fresh storage root: writes the compatibility marker and
    /// an empty tree state.
    pub async fn init(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("tiles")).await?;
        fs::create_dir_all(root.join("bundles")).await?;
        write_atomic(
            &root.join("compatibility"),
            super::COMPATIBILITY_VERSION.to_string().as_bytes(),
        )
        .await?;
        let storage = Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        };
        storage.write_tree_state_file(TreeState::empty()).await?;
        Ok(storage)
    }

    fn tile_path(&self, id: TileId) -> PathBuf {
        self.root
            .join("tiles")
            .join(id.level.to_string())
            .join(id.index.to_string())
    }

    fn bundle_path(&self, tile_index: u64) -> PathBuf {
        self.root.join("bundles").join(tile_index.to_string())
    }

    fn tree_state_path(&self) -> PathBuf {
        self.root.join("tree_state")
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.root.join("checkpoint")
    }

    async fn read_tile_file(&self, id: TileId) -> Result<HashTile> {
        let bytes = fs::read(self.tile_path(id)).await.map_err(not_found)?;
        if bytes.len() % NodeHash::LEN != 0 {
            return Err(Error::Malformed("tile file length not a multiple of 32".into()));
        }
        let hashes = bytes
            .chunks_exact(NodeHash::LEN)
            .map(|c| NodeHash::from_slice(c).expect("chunks_exact guarantees len"))
            .collect();
        Ok(HashTile::from_hashes(id, hashes))
    }

    async fn read_bundle_file(&self, tile_index: u64) -> Result<EntryBundle> {
        let bytes = fs::read(self.bundle_path(tile_index)).await.map_err(not_found)?;
        EntryBundle::parse(tile_index, bytes.into())
            .map_err(|e| Error::Malformed(e.to_string()))
    }

    async fn write_tile_file(&self, tile: &HashTile) -> Result<()> {
        let mut bytes = Vec::with_capacity(tile.bottom_row().len() * NodeHash::LEN);
        for h in tile.bottom_row() {
            bytes.extend_from_slice(h.as_bytes());
        }
        let path = self.tile_path(tile.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, &bytes).await
    }

    async fn write_bundle_file(&self, bundle: &EntryBundle) -> Result<()> {
        write_atomic(&self.bundle_path(bundle.tile_index), bundle.as_bytes()).await
    }

    async fn write_tree_state_file(&self, state: TreeState) -> Result<()> {
        let file = TreeStateFile {
            size: state.size,
            root: state.root,
        };
        let bytes = serde_json::to_vec(&file).map_err(|e| Error::Fatal(e.to_string()))?;
        write_atomic(&self.tree_state_path(), &bytes).await
    }

    async fn write_checkpoint_file(&self, checkpoint: Checkpoint) -> Result<()> {
        let file = CheckpointFile {
            note: checkpoint.note,
            published_at: checkpoint.published_at,
        };
        let bytes = serde_json::to_vec(&file).map_err(|e| Error::Fatal(e.to_string()))?;
        write_atomic(&self.checkpoint_path(), &bytes).await
    }
}

fn not_found(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound
    } else {
        Error::Io(e)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| Error::Fatal("path has no parent".into()))?;
    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("obj"),
        uuid_like_suffix()
    ));
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// A lightweight unique suffix without pulling in a UUID dependency: pid
/// plus a process-local counter is enough to avoid collisions between
/// concurrent writers to distinct final paths within one process.
fn uuid_like_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[async_trait]
impl Storage for FsStorage {
    async fn read_checkpoint(&self) -> Result<Checkpoint> {
        let bytes = fs::read(self.checkpoint_path()).await.map_err(not_found)?;
        let file: CheckpointFile =
            serde_json::from_slice(&bytes).map_err(|e| Error::Malformed(e.to_string()))?;
        Ok(Checkpoint {
            note: file.note,
            published_at: file.published_at,
        })
    }

    async fn read_tile(&self, id: TileId, requested_size: u64) -> Result<HashTile> {
        let tile = self.read_tile_file(id).await?;
        if layout::satisfies_partial_request(tile.size(), requested_size) {
            Ok(tile)
        } else {
            Err(Error::NotFound)
        }
    }

    async fn read_entry_bundle(
        &self,
        tile_index: u64,
        requested_size: u64,
    ) -> Result<EntryBundle> {
        let bundle = self.read_bundle_file(tile_index).await?;
        if layout::satisfies_partial_request(bundle.size() as u64, requested_size) {
            Ok(bundle)
        } else {
            Err(Error::NotFound)
        }
    }

    async fn integrated_size(&self) -> Result<u64> {
        let bytes = fs::read(self.tree_state_path()).await.map_err(not_found)?;
        let file: TreeStateFile =
            serde_json::from_slice(&bytes).map_err(|e| Error::Malformed(e.to_string()))?;
        Ok(file.size)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        let tree_state = {
            let bytes = fs::read(self.tree_state_path()).await.map_err(not_found)?;
            let file: TreeStateFile =
                serde_json::from_slice(&bytes).map_err(|e| Error::Malformed(e.to_string()))?;
            TreeState {
                size: file.size,
                root: file.root,
            }
        };
        Ok(Box::new(FsTransaction {
            storage: self.clone_handle(),
            _guard: guard,
            base_tree_state: tree_state,
            new_tree_state: None,
            new_checkpoint: None,
            dirty_tiles: HashMap::new(),
            dirty_bundles: HashMap::new(),
        }))
    }
}

impl FsStorage {
    fn clone_handle(&self) -> FsStorage {
        FsStorage {
            root: self.root.clone(),
            write_lock: Arc::clone(&self.write_lock),
        }
    }
}

struct FsTransaction {
    storage: FsStorage,
    _guard: OwnedMutexGuard<()>,
    base_tree_state: TreeState,
    new_tree_state: Option<TreeState>,
    new_checkpoint: Option<Checkpoint>,
    dirty_tiles: HashMap<TileId, HashTile>,
    dirty_bundles: HashMap<u64, EntryBundle>,
}

#[async_trait]
impl Transaction for FsTransaction {
    async fn get_tree_state(&mut self) -> Result<TreeState> {
        Ok(self.new_tree_state.unwrap_or(self.base_tree_state))
    }

    async fn get_tile(&mut self, id: TileId) -> Result<Option<HashTile>> {
        if let Some(t) = self.dirty_tiles.get(&id) {
            return Ok(Some(t.clone()));
        }
        match self.storage.read_tile_file(id).await {
            Ok(t) => Ok(Some(t)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_bundle(&mut self, tile_index: u64) -> Result<Option<EntryBundle>> {
        if let Some(b) = self.dirty_bundles.get(&tile_index) {
            return Ok(Some(b.clone()));
        }
        match self.storage.read_bundle_file(tile_index).await {
            Ok(b) => Ok(Some(b)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_tile(&mut self, tile: HashTile) -> Result<()> {
        self.dirty_tiles.insert(tile.id, tile);
        Ok(())
    }

    async fn write_bundle(&mut self, bundle: EntryBundle) -> Result<()> {
        self.dirty_bundles.insert(bundle.tile_index, bundle);
        Ok(())
    }

    async fn write_tree_state(&mut self, state: TreeState) -> Result<()> {
        self.new_tree_state = Some(state);
        Ok(())
    }

    async fn write_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<()> {
        self.new_checkpoint = Some(checkpoint);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        for tile in self.dirty_tiles.values() {
            self.storage.write_tile_file(tile).await?;
        }
        for bundle in self.dirty_bundles.values() {
            self.storage.write_bundle_file(bundle).await?;
        }
        if let Some(state) = self.new_tree_state {
            self.storage.write_tree_state_file(state).await?;
        }
        if let Some(checkpoint) = self.new_checkpoint {
            self.storage.write_checkpoint_file(checkpoint).await?;
        }
        Ok(())
    }
}
