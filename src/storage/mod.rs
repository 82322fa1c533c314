//! The persistence driver contract (§4.4).
//!
//! Four row-families — `Checkpoint`, `TreeState`, hash tiles, and entry
//! bundles — behind a capability set any adapter (filesystem, relational,
//! object store) can implement. The integrator is the only thing that opens
//! a [`Transaction`]; everyone else reads lock-free snapshots.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entry::EntryBundle;
use crate::error::Result;
use crate::hash::NodeHash;
use crate::layout::TileId;
use crate::tile::HashTile;

/// `Tessera(id=0, compatibilityVersion=1)` — rejected on mismatch at
/// startup so an adapter never serves a storage root written by an
/// incompatible version of this crate.
pub const COMPATIBILITY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeState {
    pub size: u64,
    pub root: NodeHash,
}

impl TreeState {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            size: 0,
            root: crate::hash::empty_root(),
        }
    }
}

impl Default for TreeState {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// The signed note bytes, as produced by [`crate::signer::format_checkpoint`].
    pub note: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

/// A request for a tile or bundle at a specific partial size, per the
/// partial-tile read policy: the stored object satisfies the request iff
/// `stored_size >= requested_size`.
#[derive(Debug, Clone, Copy)]
pub struct PartialRequest {
    pub requested_size: u64,
}

#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn read_checkpoint(&self) -> Result<Checkpoint>;
    async fn read_tile(&self, id: TileId, requested_size: u64) -> Result<HashTile>;
    async fn read_entry_bundle(&self, tile_index: u64, requested_size: u64)
        -> Result<EntryBundle>;
    async fn integrated_size(&self) -> Result<u64>;

    /// Opens a transaction with exclusive write access to `TreeState`, tiles,
    /// bundles, and the checkpoint. The integrator uses this for tree
    /// mutation; the checkpoint publisher opens one purely to call
    /// `write_checkpoint`, so the two never race on the same storage root.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn get_tree_state(&mut self) -> Result<TreeState>;
    async fn get_tile(&mut self, id: TileId) -> Result<Option<HashTile>>;
    async fn get_bundle(&mut self, tile_index: u64) -> Result<Option<EntryBundle>>;
    async fn write_tile(&mut self, tile: HashTile) -> Result<()>;
    async fn write_bundle(&mut self, bundle: EntryBundle) -> Result<()>;
    async fn write_tree_state(&mut self, state: TreeState) -> Result<()>;
    async fn write_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
}
