//! Tile and bundle addressing arithmetic.
//!
//! Centralizes the pure math that maps leaf indices to entry bundles and
//! tree nodes to hash tiles, so the integrator, every storage adapter, and
//! the reader-side tracker all agree on the same coordinates.
//!
//! A node `(level, idx)` (level 0 = leaves) is considered *stored* once its
//! subtree is complete, i.e. `(idx + 1) << level <= size`. Tiles group eight
//! consecutive tree levels (`TILE_HEIGHT`) into one subtree keyed by
//! `(tile_level, tile_index)`; within a tile, `node_level` (0..=7) and
//! `node_index` locate the node, with the bottom row (`node_level == 0`)
//! holding up to `TILE_WIDTH` hashes and each row above halving in width.

/// Number of tree levels grouped into a single hash tile.
pub const TILE_HEIGHT: u32 = 8;

/// Width (in nodes) of the bottom row of a hash tile; `2^TILE_HEIGHT`.
pub const TILE_WIDTH: u64 = 1 << TILE_HEIGHT;

/// Width (in entries) of an entry bundle.
pub const ENTRY_BUNDLE_WIDTH: u64 = 256;

/// Address of a tile: which 8-level subtree, at which horizontal offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId {
    pub level: u8,
    pub index: u64,
}

impl TileId {
    #[must_use]
    pub const fn new(level: u8, index: u64) -> Self {
        Self { level, index }
    }
}

/// Where inside a tile a given tree node lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLocalAddress {
    pub tile: TileId,
    pub node_level: u8,
    pub node_index: u64,
}

/// Width of the row at `node_level` within a tile (`TILE_WIDTH >> node_level`).
#[must_use]
pub fn tile_row_width(node_level: u8) -> u64 {
    assert!(u32::from(node_level) < TILE_HEIGHT, "node_level out of range");
    TILE_WIDTH >> node_level
}

/// Maps a full-tree node address to its tile-local address.
#[must_use]
pub fn node_to_tile(level: u64, index: u64) -> TileLocalAddress {
    let tile_level = level / u64::from(TILE_HEIGHT);
    let node_level = (level % u64::from(TILE_HEIGHT)) as u8;
    let row_width = tile_row_width(node_level);
    TileLocalAddress {
        tile: TileId::new(
            u8::try_from(tile_level).expect("tile level exceeds u8 — tree implausibly tall"),
            index / row_width,
        ),
        node_level,
        node_index: index % row_width,
    }
}

/// Number of nodes *stored* (their subtree is complete) at `level` when the
/// tree has `size` leaves: `floor(size / 2^level)`.
#[must_use]
pub fn nodes_at_level(size: u64, level: u64) -> u64 {
    if level >= 64 {
        return 0;
    }
    size >> level
}

/// Whether the node `(level, index)` is stored (its subtree is complete) at
/// the given tree `size`.
#[must_use]
pub fn is_node_stored(level: u64, index: u64, size: u64) -> bool {
    index < nodes_at_level(size, level)
}

/// Number of bottom-row (`node_level == 0`) entries present in the tile
/// `(tile_level, tile_index)` when the tree has `size` leaves. `0` means the
/// tile does not exist yet; `TILE_WIDTH` means it is sealed.
#[must_use]
pub fn partial_tile_size(tile_level: u8, tile_index: u64, size: u64) -> u64 {
    let full_level = u64::from(tile_level) * u64::from(TILE_HEIGHT);
    let stored_at_level = nodes_at_level(size, full_level);
    stored_at_level
        .saturating_sub(tile_index * TILE_WIDTH)
        .min(TILE_WIDTH)
}

/// Index of the entry bundle holding leaf `leaf_index`.
#[must_use]
pub fn bundle_index(leaf_index: u64) -> u64 {
    leaf_index / ENTRY_BUNDLE_WIDTH
}

/// Number of entries present in bundle `bundle_index` when the tree has
/// `size` leaves. `0` means the bundle does not exist yet; `ENTRY_BUNDLE_WIDTH`
/// means it is sealed.
#[must_use]
pub fn partial_bundle_size(bundle_index: u64, size: u64) -> u64 {
    let start = bundle_index * ENTRY_BUNDLE_WIDTH;
    size.saturating_sub(start).min(ENTRY_BUNDLE_WIDTH)
}

/// Applies the partial-tile/bundle read policy shared by every adapter:
/// a request for partial size `requested` is satisfied by a stored object of
/// `stored` entries iff `stored >= requested`; a smaller stored object is a
/// `NotFound`, a larger (or equal) one is returned as-is.
#[must_use]
pub fn satisfies_partial_request(stored: u64, requested: u64) -> bool {
    stored >= requested
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 0, 0 => TileLocalAddress{tile: TileId::new(0,0), node_level: 0, node_index: 0})]
    #[test_case(0, 255, 0 => TileLocalAddress{tile: TileId::new(0,0), node_level: 0, node_index: 255})]
    #[test_case(0, 256, 0 => TileLocalAddress{tile: TileId::new(0,1), node_level: 0, node_index: 0})]
    #[test_case(7, 1, 0 => TileLocalAddress{tile: TileId::new(0,0), node_level: 7, node_index: 1})]
    #[test_case(8, 0, 0 => TileLocalAddress{tile: TileId::new(1,0), node_level: 0, node_index: 0})]
    fn node_to_tile_cases(level: u64, index: u64, _unused: u64) -> TileLocalAddress {
        node_to_tile(level, index)
    }

    #[test]
    fn bundle_boundary_257_entries() {
        // S4: 257 entries -> bundle 0 sealed at 256, bundle 1 has size 1.
        assert_eq!(partial_bundle_size(0, 257), ENTRY_BUNDLE_WIDTH);
        assert_eq!(partial_bundle_size(1, 257), 1);
        assert_eq!(bundle_index(256), 1);
    }

    #[test]
    fn tile_partial_size_tracks_stored_nodes() {
        // At size=10, level-0 has 10 stored nodes, all within tile (0,0).
        assert_eq!(partial_tile_size(0, 0, 10), 10);
        // At size=256, tile (0,0) is sealed, level-8 row has exactly 1 stored node.
        assert_eq!(partial_tile_size(0, 0, 256), 256);
        assert_eq!(partial_tile_size(1, 0, 256), 1);
        // Below a full 256 group, level 8 has zero stored nodes yet.
        assert_eq!(partial_tile_size(1, 0, 255), 0);
    }

    #[test]
    fn satisfies_partial_request_policy() {
        assert!(satisfies_partial_request(10, 10));
        assert!(satisfies_partial_request(256, 10));
        assert!(!satisfies_partial_request(9, 10));
    }

    proptest::proptest! {
        #[test]
        fn nodes_at_level_never_exceeds_size(size in 0u64..1_000_000, level in 0u64..40) {
            let n = nodes_at_level(size, level);
            assert!(n <= size);
        }

        #[test]
        fn node_to_tile_roundtrips_within_row_width(level in 0u64..32, index in 0u64..1_000_000) {
            let addr = node_to_tile(level, index);
            let row_width = tile_row_width(addr.node_level);
            assert!(addr.node_index < row_width);
        }
    }
}
