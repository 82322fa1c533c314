//! S4: crossing a 256-entry bundle boundary seals bundle 0 and
//! opens bundle 1 with the overflow; `Subtree(1,0)` exists and holds the
//! level-1 hash combining the first 256 leaves.

mod common;

use std::time::Duration;

use tlog_sequencer::entry::Entry;
use tlog_sequencer::hash;
use tlog_sequencer::layout::{self, TileId};

#[tokio::test]
async fn crossing_the_256_entry_boundary_seals_bundle_zero() {
    let harness = common::Harness::spawn(100_000, Duration::from_secs(60));

    let entries: Vec<Entry> = (0..257u32).map(|i| Entry::new(i.to_le_bytes().to_vec())).collect();
    let mut tasks = Vec::new();
    for entry in entries {
        let handle = harness.sequencer.clone();
        tasks.push(tokio::spawn(async move { handle.add(entry).await.unwrap() }));
    }
    let mut indices = Vec::new();
    for task in tasks {
        indices.push(task.await.unwrap().0);
    }
    indices.sort_unstable();
    assert_eq!(indices, (0..257u64).collect::<Vec<_>>());
    assert_eq!(harness.storage.integrated_size().await.unwrap(), 257);

    let bundle0 = harness.storage.read_entry_bundle(0, layout::ENTRY_BUNDLE_WIDTH).await.unwrap();
    assert!(bundle0.is_sealed());
    assert_eq!(bundle0.size() as u64, layout::ENTRY_BUNDLE_WIDTH);

    let bundle1 = harness.storage.read_entry_bundle(1, 1).await.unwrap();
    assert_eq!(bundle1.size(), 1);
    assert!(!bundle1.is_sealed());

    // Tile (0,0) sealed at 256 leaves cascades into a level-1 hash.
    let level0 = harness.storage.read_tile(TileId::new(0, 0), layout::TILE_WIDTH).await.unwrap();
    assert!(level0.is_sealed());
    let combined = hash::node_hash(
        &level0.node_hash_at(7, 0).unwrap(),
        &level0.node_hash_at(7, 1).unwrap(),
    );

    let level1 = harness.storage.read_tile(TileId::new(1, 0), 1).await.unwrap();
    assert_eq!(level1.bottom_row()[0], combined);
}
