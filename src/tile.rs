//! Hash tiles: the stored bottom row of each 8-level subtree, plus the pure
//! arithmetic for deriving any node within that subtree from it.

use thiserror::Error;

use crate::hash::{self, NodeHash};
use crate::layout::{self, TileId, TILE_HEIGHT, TILE_WIDTH};

/// The bottom-row hashes of one 8-level subtree. Every other node in the
/// subtree is derivable by repeated `node_hash` composition, so this is all
/// that ever needs to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTile {
    pub id: TileId,
    hashes: Vec<NodeHash>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TileError {
    #[error("tile would exceed {TILE_WIDTH} entries")]
    TooWide,
    #[error("node out of range for this tile's current size")]
    OutOfRange,
}

impl HashTile {
    #[must_use]
    pub fn empty(id: TileId) -> Self {
        Self {
            id,
            hashes: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_hashes(id: TileId, hashes: Vec<NodeHash>) -> Self {
        Self { id, hashes }
    }

    /// Bottom-row size: `0` means the tile does not exist, `TILE_WIDTH` means
    /// it is sealed.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.hashes.len() as u64
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.size() == TILE_WIDTH
    }

    #[must_use]
    pub fn bottom_row(&self) -> &[NodeHash] {
        &self.hashes
    }

    pub fn append(&mut self, hashes: &[NodeHash]) -> Result<(), TileError> {
        if self.hashes.len() + hashes.len() > TILE_WIDTH as usize {
            return Err(TileError::TooWide);
        }
        self.hashes.extend_from_slice(hashes);
        Ok(())
    }

    /// Derives the hash of the node at tile-local `(node_level, node_index)`.
    /// Only valid when that node's subtree is fully covered by the tile's
    /// current bottom row; otherwise `OutOfRange`.
    pub fn node_hash_at(&self, node_level: u8, node_index: u64) -> Result<NodeHash, TileError> {
        let width = layout::tile_row_width(node_level);
        if node_index >= width {
            return Err(TileError::OutOfRange);
        }
        self.derive(node_level, node_index)
    }

    fn derive(&self, node_level: u8, node_index: u64) -> Result<NodeHash, TileError> {
        if node_level == 0 {
            return self
                .hashes
                .get(node_index as usize)
                .copied()
                .ok_or(TileError::OutOfRange);
        }
        let left = self.derive(node_level - 1, node_index * 2)?;
        let right = self.derive(node_level - 1, node_index * 2 + 1)?;
        Ok(hash::node_hash(&left, &right))
    }
}

/// The full-tree-level equivalent of `HashTile::node_hash_at`, resolving a
/// global `(level, index)` node address through the tile that contains it.
#[must_use]
pub fn full_level_of(tile_level: u8) -> u64 {
    u64::from(tile_level) * u64::from(TILE_HEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_from_leaves(leaves: &[&[u8]]) -> HashTile {
        let mut tile = HashTile::empty(TileId::new(0, 0));
        let hashes: Vec<NodeHash> = leaves.iter().map(|l| hash::leaf_hash(l)).collect();
        tile.append(&hashes).unwrap();
        tile
    }

    #[test]
    fn two_leaf_tile_root_matches_manual_hash() {
        let tile = tile_from_leaves(&[b"a", b"b"]);
        let expected = hash::node_hash(&hash::leaf_hash(b"a"), &hash::leaf_hash(b"b"));
        assert_eq!(tile.node_hash_at(1, 0).unwrap(), expected);
    }

    #[test]
    fn out_of_range_when_subtree_incomplete() {
        let tile = tile_from_leaves(&[b"a", b"b", b"c"]);
        // Node (level 2, index 0) needs 4 leaves; only 3 are present.
        assert_eq!(
            tile.node_hash_at(2, 0),
            Err(TileError::OutOfRange)
        );
        // But (level 1, index 0) over the first two leaves is fine.
        assert!(tile.node_hash_at(1, 0).is_ok());
    }

    #[test]
    fn sealed_tile_exposes_full_subtree() {
        let leaves: Vec<Vec<u8>> = (0u16..256).map(|i| i.to_le_bytes().to_vec()).collect();
        let leaf_refs: Vec<&[u8]> = leaves.iter().map(Vec::as_slice).collect();
        let tile = tile_from_leaves(&leaf_refs);
        assert!(tile.is_sealed());
        assert!(tile.node_hash_at(7, 0).is_ok());
        assert_eq!(tile.node_hash_at(7, 1), Err(TileError::OutOfRange));
    }
}
