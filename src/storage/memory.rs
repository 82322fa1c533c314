//! In-memory reference [`Storage`] adapter: no persistence across process
//! restarts, used by unit and property tests and as a template other
//! adapters can be checked against.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::entry::EntryBundle;
use crate::error::{Error, Result};
use crate::layout::{self, TileId};
use crate::tile::HashTile;

use super::{Checkpoint, Storage, Transaction, TreeState};

#[derive(Default)]
struct State {
    tree_state: TreeState,
    tiles: HashMap<TileId, HashTile>,
    bundles: HashMap<u64, EntryBundle>,
    checkpoint: Option<Checkpoint>,
}

pub struct MemoryStorage {
    state: Arc<Mutex<State>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read_checkpoint(&self) -> Result<Checkpoint> {
        self.state
            .lock()
            .await
            .checkpoint
            .clone()
            .ok_or(Error::NotFound)
    }

    async fn read_tile(&self, id: TileId, requested_size: u64) -> Result<HashTile> {
        let state = self.state.lock().await;
        let tile = state.tiles.get(&id).ok_or(Error::NotFound)?;
        if layout::satisfies_partial_request(tile.size(), requested_size) {
            Ok(tile.clone())
        } else {
            Err(Error::NotFound)
        }
    }

    async fn read_entry_bundle(
        &self,
        tile_index: u64,
        requested_size: u64,
    ) -> Result<EntryBundle> {
        let state = self.state.lock().await;
        let bundle = state.bundles.get(&tile_index).ok_or(Error::NotFound)?;
        if layout::satisfies_partial_request(bundle.size() as u64, requested_size) {
            Ok(bundle.clone())
        } else {
            Err(Error::NotFound)
        }
    }

    async fn integrated_size(&self) -> Result<u64> {
        Ok(self.state.lock().await.tree_state.size)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            guard,
            dirty_tiles: HashMap::new(),
            dirty_bundles: HashMap::new(),
            new_tree_state: None,
            new_checkpoint: None,
        }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<State>,
    dirty_tiles: HashMap<TileId, HashTile>,
    dirty_bundles: HashMap<u64, EntryBundle>,
    new_tree_state: Option<TreeState>,
    new_checkpoint: Option<Checkpoint>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get_tree_state(&mut self) -> Result<TreeState> {
        Ok(self.new_tree_state.unwrap_or(self.guard.tree_state))
    }

    async fn get_tile(&mut self, id: TileId) -> Result<Option<HashTile>> {
        if let Some(t) = self.dirty_tiles.get(&id) {
            return Ok(Some(t.clone()));
        }
        Ok(self.guard.tiles.get(&id).cloned())
    }

    async fn get_bundle(&mut self, tile_index: u64) -> Result<Option<EntryBundle>> {
        if let Some(b) = self.dirty_bundles.get(&tile_index) {
            return Ok(Some(b.clone()));
        }
        Ok(self.guard.bundles.get(&tile_index).cloned())
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

    async fn commit(mut self: Box<Self>) -> Result<()> {
        for (id, tile) in self.dirty_tiles.drain() {
            self.guard.tiles.insert(id, tile);
        }
        for (idx, bundle) in self.dirty_bundles.drain() {
            self.guard.bundles.insert(idx, bundle);
        }
        if let Some(state) = self.new_tree_state {
            self.guard.tree_state = state;
        }
        if let Some(checkpoint) = self.new_checkpoint {
            self.guard.checkpoint = Some(checkpoint);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    #[tokio::test]
    async fn fresh_storage_has_empty_tree_and_no_checkpoint() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.integrated_size().await.unwrap(), 0);
        assert!(matches!(
            storage.read_checkpoint().await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn transaction_commit_is_visible_to_later_reads() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();

        let mut bundle = EntryBundle::empty(0);
        bundle.append(&[Entry::new(&b"x"[..])]).unwrap();
        tx.write_bundle(bundle.clone()).await.unwrap();
        tx.write_tree_state(TreeState {
            size: 1,
            root: Entry::new(&b"x"[..]).leaf_hash(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(storage.integrated_size().await.unwrap(), 1);
        let stored = storage.read_entry_bundle(0, 1).await.unwrap();
        assert_eq!(stored.as_bytes(), bundle.as_bytes());
    }

    #[tokio::test]
    async fn uncommitted_writes_are_not_visible() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        tx.write_tree_state(TreeState {
            size: 5,
            root: crate::hash::empty_root(),
        })
        .await
        .unwrap();
        // Dropped without commit.
        drop(tx);

        assert_eq!(storage.integrated_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn checkpoint_write_goes_through_a_transaction() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        tx.write_checkpoint(Checkpoint {
            note: b"example checkpoint".to_vec(),
            published_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let checkpoint = storage.read_checkpoint().await.unwrap();
        assert_eq!(checkpoint.note, b"example checkpoint");
    }
}
