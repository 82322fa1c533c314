//! The single-writer integration path (§4.3): assigns contiguous indices to
//! a batch, extends entry bundles and hash tiles, and folds the new leaves
//! into the tree root using a right-frontier compact range rather than a
//! full recompute — cost is `O(batch + log(size))`, never `O(size)`.

use crate::entry::{Entry, EntryBundle};
use crate::error::{Error, Result};
use crate::hash::{self, NodeHash};
use crate::layout::{self, TileId, ENTRY_BUNDLE_WIDTH};
use crate::storage::{Storage, Transaction, TreeState};
use crate::tile::HashTile;

/// Integrates `batch` into `storage`, returning the new tree size and root.
///
/// An empty batch is a read-only no-op: it returns `(size, rootAt(size))`
/// without opening a transaction, so retrying with an empty batch is always
/// safe and idempotent.
pub async fn integrate(storage: &dyn Storage, batch: &[Entry]) -> Result<(u64, NodeHash)> {
    if batch.is_empty() {
        let size = storage.integrated_size().await?;
        let root = root_from_storage(storage, size).await?;
        return Ok((size, root));
    }

    let mut tx = storage.begin().await?;
    let state = tx.get_tree_state().await?;
    let start = state.size;

    write_bundles_and_leaf_tiles(tx.as_mut(), start, batch).await?;

    let mut frontier = reconstruct_frontier(tx.as_mut(), start).await?;
    let mut size = start;
    for entry in batch {
        append_leaf(&mut frontier, entry.leaf_hash(), size);
        size += 1;
    }
    let root = fold_root(&frontier);

    tx.write_tree_state(TreeState { size, root }).await?;
    tx.commit().await?;
    Ok((size, root))
}

/// Appends entries to entry bundles and the corresponding level-0 hash
/// tiles, cascading sealed tiles upward so higher tile levels stay
/// populated for frontier reconstruction and proof serving.
async fn write_bundles_and_leaf_tiles(
    tx: &mut dyn Transaction,
    start: u64,
    batch: &[Entry],
) -> Result<()> {
    let mut index = start;
    let mut remaining = batch;
    while !remaining.is_empty() {
        let bidx = layout::bundle_index(index);
        let mut bundle = tx
            .get_bundle(bidx)
            .await?
            .unwrap_or_else(|| EntryBundle::empty(bidx));
        let tile_id = TileId::new(0, bidx);
        let mut tile = tx
            .get_tile(tile_id)
            .await?
            .unwrap_or_else(|| HashTile::empty(tile_id));

        let space = (ENTRY_BUNDLE_WIDTH as usize) - bundle.size();
        let take = space.min(remaining.len());
        let (chunk, rest) = remaining.split_at(take);

        bundle
            .append(chunk)
            .map_err(|e| Error::Fatal(format!("entry bundle {bidx}: {e}")))?;
        let leaf_hashes: Vec<NodeHash> = chunk.iter().map(Entry::leaf_hash).collect();
        tile.append(&leaf_hashes)
            .map_err(|e| Error::Fatal(format!("hash tile {tile_id:?}: {e}")))?;

        let sealed = tile.is_sealed();
        tx.write_bundle(bundle).await?;
        tx.write_tile(tile).await?;
        if sealed {
            cascade_sealed_tile(tx, tile_id).await?;
        }

        index += take as u64;
        remaining = rest;
    }
    Ok(())
}

/// A tile just sealed (reached `TILE_WIDTH` bottom-row entries); its
/// combined root becomes the next bottom-row entry of the tile one level up,
/// possibly sealing that tile in turn.
async fn cascade_sealed_tile(tx: &mut dyn Transaction, mut sealed: TileId) -> Result<()> {
    loop {
        let tile = tx
            .get_tile(sealed)
            .await?
            .ok_or_else(|| Error::Fatal(format!("sealed tile {sealed:?} vanished mid-transaction")))?;
        let top_width = layout::tile_row_width((layout::TILE_HEIGHT - 1) as u8);
        debug_assert_eq!(top_width, 2, "TILE_HEIGHT changed without updating cascade logic");
        let combined = hash::node_hash(
            &tile
                .node_hash_at((layout::TILE_HEIGHT - 1) as u8, 0)
                .map_err(|e| Error::Fatal(e.to_string()))?,
            &tile
                .node_hash_at((layout::TILE_HEIGHT - 1) as u8, 1)
                .map_err(|e| Error::Fatal(e.to_string()))?,
        );

        let parent_level = sealed
            .level
            .checked_add(1)
            .ok_or_else(|| Error::Fatal("tile level overflow".into()))?;
        let parent_id = TileId::new(parent_level, sealed.index / layout::TILE_WIDTH);
        let mut parent = tx
            .get_tile(parent_id)
            .await?
            .unwrap_or_else(|| HashTile::empty(parent_id));
        parent
            .append(&[combined])
            .map_err(|e| Error::Fatal(format!("hash tile {parent_id:?}: {e}")))?;
        let parent_sealed = parent.is_sealed();
        tx.write_tile(parent).await?;

        if !parent_sealed {
            return Ok(());
        }
        sealed = parent_id;
    }
}

async fn fetch_stored_node(tx: &mut dyn Transaction, level: u64, index: u64) -> Result<NodeHash> {
    let addr = layout::node_to_tile(level, index);
    let tile = tx
        .get_tile(addr.tile)
        .await?
        .ok_or_else(|| Error::Fatal(format!("missing frontier tile {:?}", addr.tile)))?;
    tile.node_hash_at(addr.node_level, addr.node_index)
        .map_err(|_| Error::Fatal(format!("missing frontier node at level {level} index {index}")))
}

/// Rebuilds the right frontier (the stored complete-subtree hashes, one per
/// set bit of `size`, ordered largest subtree first) that a compact range
/// needs to extend the tree from `size`.
async fn reconstruct_frontier(tx: &mut dyn Transaction, size: u64) -> Result<Vec<NodeHash>> {
    let mut frontier = Vec::new();
    for level in (0..64u64).rev() {
        if (size >> level) & 1 == 1 {
            let index = (size >> level) - 1;
            frontier.push(fetch_stored_node(tx, level, index).await?);
        }
    }
    Ok(frontier)
}

/// Folds one new leaf into the frontier, carrying completed subtrees
/// upward exactly as the binary representation of `size_before` dictates.
fn append_leaf(frontier: &mut Vec<NodeHash>, leaf: NodeHash, size_before: u64) {
    let mut hash = leaf;
    let mut carry = size_before;
    while carry & 1 == 1 {
        let left = frontier.pop().expect("frontier has a peer for every set bit");
        hash = hash::node_hash(&left, &hash);
        carry >>= 1;
    }
    frontier.push(hash);
}

/// Combines the frontier's peaks (largest first) into a single root,
/// folding from the smallest (rightmost) peak leftward.
fn fold_root(frontier: &[NodeHash]) -> NodeHash {
    let mut iter = frontier.iter().rev();
    let mut hash = *iter.next().expect("non-empty batch leaves a non-empty frontier");
    for left in iter {
        hash = hash::node_hash(left, &hash);
    }
    hash
}

/// The root at a given (already-integrated) `size`, recomputed read-only
/// from stored tiles. Used for the `n = 0` tie-break and by the checkpoint
/// publisher, which never opens a write transaction.
pub async fn root_at(storage: &dyn Storage, size: u64) -> Result<NodeHash> {
    root_from_storage(storage, size).await
}

async fn root_from_storage(storage: &dyn Storage, size: u64) -> Result<NodeHash> {
    if size == 0 {
        return Ok(hash::empty_root());
    }
    let mut frontier = Vec::new();
    for level in (0..64u64).rev() {
        if (size >> level) & 1 == 1 {
            let index = (size >> level) - 1;
            let addr = layout::node_to_tile(level, index);
            let tile = storage.read_tile(addr.tile, 0).await?;
            let hash = tile
                .node_hash_at(addr.node_level, addr.node_index)
                .map_err(|_| Error::Fatal(format!("missing stored node at level {level} index {index}")))?;
            frontier.push(hash);
        }
    }
    Ok(fold_root(&frontier))
}
