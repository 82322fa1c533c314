//! Reader-side node resolution: a tile-backed [`NodeCache`] plus the
//! recursive RFC 6962 range-hash computation inclusion and consistency
//! checks are built from.

use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::hash::{self, NodeHash};
use crate::layout::{self, TileId};
use crate::storage::Storage;
use crate::tile::HashTile;

/// Caches whole tiles fetched from storage, resolving individual node
/// addresses against them. One [`NodeCache`] backs one [`ProofBuilder`]
/// (§4.5): a tree-size skew between two calls import stale data only in the
/// sense that a node that didn't exist yet at fetch time stays absent —
/// already-sealed tiles never change underneath it.
pub struct NodeCache<'s> {
    storage: &'s dyn Storage,
    tiles: Mutex<HashMap<TileId, HashTile>>,
}

impl<'s> NodeCache<'s> {
    #[must_use]
    pub fn new(storage: &'s dyn Storage) -> Self {
        Self {
            storage,
            tiles: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `(level, idx)` to a hash via the tile that contains it,
    /// fetching and caching the tile on first access. `Err(Error::NotFound)`
    /// ("OutOfRange" in the design's terms) if the position does not exist
    /// in the fetched tile — e.g. the tree grew past this cache's snapshot.
    pub async fn get_node(&self, level: u64, idx: u64) -> Result<NodeHash> {
        let addr = layout::node_to_tile(level, idx);
        {
            let guard = self.tiles.lock().await;
            if let Some(tile) = guard.get(&addr.tile) {
                return tile
                    .node_hash_at(addr.node_level, addr.node_index)
                    .map_err(|_| Error::NotFound);
            }
        }
        let tile = self.storage.read_tile(addr.tile, 0).await?;
        let result = tile
            .node_hash_at(addr.node_level, addr.node_index)
            .map_err(|_| Error::NotFound);
        self.tiles.lock().await.insert(addr.tile, tile);
        result
    }
}

/// Lazily resolves the nodes needed to verify inclusion/consistency at a
/// target tree size, backed by a [`NodeCache`]. Fetches happen on demand as
/// `verify_inclusion`/`verify_consistency` walk the range decomposition.
pub struct ProofBuilder<'s> {
    pub size: u64,
    cache: NodeCache<'s>,
}

impl<'s> ProofBuilder<'s> {
    #[must_use]
    pub fn new(storage: &'s dyn Storage, size: u64) -> Self {
        Self {
            size,
            cache: NodeCache::new(storage),
        }
    }

    /// The root of the tree at `self.size`. Succeeds (resolving to
    /// `EMPTY_ROOT`) even when `size == 0`.
    pub async fn root(&self) -> Result<NodeHash> {
        tree_root_at(&self.cache, self.size).await
    }

    /// Verifies that `leaf_hash` is the entry at `index` in a tree of
    /// `self.size` leaves. Errors (does not return `Ok(false)`) for
    /// `index >= size`, including the `size == 0` case, per §4.5's edge
    /// case: inclusion proofs for index 0 in an empty tree are ill-formed.
    pub async fn verify_inclusion(&self, index: u64, leaf_hash: NodeHash) -> Result<bool> {
        if index >= self.size {
            return Err(Error::NotFound);
        }
        let stored = self.cache.get_node(0, index).await?;
        Ok(stored == leaf_hash)
    }

    /// Verifies that the tree at `prior_size` with root `prior_root` is a
    /// prefix of the tree at `self.size`, by recomputing both roots from the
    /// (immutable, append-only) tiles currently in storage. Disagreement at
    /// either size is `Error::ForkDetected`.
    pub async fn verify_consistency(&self, prior_size: u64, prior_root: NodeHash) -> Result<()> {
        if prior_size > self.size {
            return Err(Error::Malformed(
                "consistency check against a larger prior size".into(),
            ));
        }
        if prior_size == 0 {
            return Ok(());
        }
        let recomputed_prior = tree_root_at(&self.cache, prior_size).await?;
        if recomputed_prior != prior_root {
            return Err(Error::ForkDetected(format!(
                "root at size {prior_size} no longer matches stored tiles"
            )));
        }
        Ok(())
    }
}

/// The Merkle root over the first `size` leaves, per RFC 6962's `MTH`
/// recursive definition, resolved through `cache` rather than raw leaves.
pub async fn tree_root_at(cache: &NodeCache<'_>, size: u64) -> Result<NodeHash> {
    if size == 0 {
        return Ok(hash::empty_root());
    }
    subtree_hash(cache, 0, size).await
}

fn subtree_hash<'a>(cache: &'a NodeCache<'a>, start: u64, width: u64) -> BoxFuture<'a, Result<NodeHash>> {
    Box::pin(async move {
        if width.is_power_of_two() {
            let level = u64::from(width.trailing_zeros());
            let idx = start / width;
            return cache.get_node(level, idx).await;
        }
        let k = largest_pow2_lt(width);
        let left = subtree_hash(cache, start, k).await?;
        let right = subtree_hash(cache, start + k, width - k).await?;
        Ok(hash::node_hash(&left, &right))
    })
}

/// Largest power of two strictly less than `n` (`n > 1`).
fn largest_pow2_lt(n: u64) -> u64 {
    debug_assert!(n > 1);
    1u64 << (63 - n.leading_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::integrator;
    use crate::storage::memory::MemoryStorage;

    #[tokio::test]
    async fn root_of_empty_tree_is_empty_root() {
        let storage = MemoryStorage::new();
        let builder = ProofBuilder::new(&storage, 0);
        assert_eq!(builder.root().await.unwrap(), hash::empty_root());
    }

    #[tokio::test]
    async fn inclusion_proof_against_empty_tree_errors() {
        let storage = MemoryStorage::new();
        let builder = ProofBuilder::new(&storage, 0);
        assert!(builder.verify_inclusion(0, hash::empty_root()).await.is_err());
    }

    #[tokio::test]
    async fn inclusion_and_consistency_hold_after_integration() {
        let storage = MemoryStorage::new();
        let batch1: Vec<Entry> = (0..10u8).map(|i| Entry::new(vec![i])).collect();
        let (size1, root1) = integrator::integrate(&storage, &batch1).await.unwrap();

        let batch2: Vec<Entry> = (10..27u8).map(|i| Entry::new(vec![i])).collect();
        let (size2, root2) = integrator::integrate(&storage, &batch2).await.unwrap();

        let builder = ProofBuilder::new(&storage, size2);
        assert!(builder
            .verify_inclusion(3, batch1[3].leaf_hash())
            .await
            .unwrap());
        builder.verify_consistency(size1, root1).await.unwrap();
        assert_eq!(builder.root().await.unwrap(), root2);
    }

    #[tokio::test]
    async fn tampering_with_a_tile_is_detected_as_fork() {
        let storage = MemoryStorage::new();
        let batch1: Vec<Entry> = (0..10u8).map(|i| Entry::new(vec![i])).collect();
        let (size1, root1) = integrator::integrate(&storage, &batch1).await.unwrap();
        let batch2: Vec<Entry> = (10..20u8).map(|i| Entry::new(vec![i])).collect();
        let (size2, _root2) = integrator::integrate(&storage, &batch2).await.unwrap();

        // Corrupt tile (0,0) by writing a tile with a flipped first hash.
        let mut tx = storage.begin().await.unwrap();
        let mut tile = tx
            .get_tile(TileId::new(0, 0))
            .await
            .unwrap()
            .expect("tile exists");
        let mut bytes = *tile.bottom_row()[0].as_bytes();
        bytes[0] ^= 0xff;
        let tampered = crate::tile::HashTile::from_hashes(
            TileId::new(0, 0),
            std::iter::once(crate::hash::NodeHash::from_bytes(bytes))
                .chain(tile.bottom_row()[1..].iter().copied())
                .collect(),
        );
        tile = tampered;
        tx.write_tile(tile).await.unwrap();
        tx.commit().await.unwrap();

        let builder = ProofBuilder::new(&storage, size2);
        assert!(matches!(
            builder.verify_consistency(size1, root1).await,
            Err(Error::ForkDetected(_))
        ));
    }
}
