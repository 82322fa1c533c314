//! S5: after committing 10 entries and then another 17,
//! verifying consistency between the two checkpoints using only stored
//! tiles succeeds; corrupting a byte of tile (0,0) makes it fail.

mod common;

use std::time::Duration;

use tlog_sequencer::entry::Entry;
use tlog_sequencer::error::Error;
use tlog_sequencer::hash::NodeHash;
use tlog_sequencer::layout::TileId;
use tlog_sequencer::proof::ProofBuilder;
use tlog_sequencer::tile::HashTile;

async fn commit(harness: &common::Harness, entries: impl Iterator<Item = u8>) {
    for entry in entries {
        harness.sequencer.add(Entry::new(vec![entry])).await.unwrap();
    }
}

#[tokio::test]
async fn consistency_holds_until_a_tile_is_tampered_with() {
    let harness = common::Harness::spawn(1_000, Duration::from_secs(60));

    commit(&harness, 0..10u8).await;
    let size1 = harness.storage.integrated_size().await.unwrap();
    let root1 = ProofBuilder::new(harness.storage.as_ref(), size1).root().await.unwrap();

    commit(&harness, 10..27u8).await;
    let size2 = harness.storage.integrated_size().await.unwrap();

    let builder = ProofBuilder::new(harness.storage.as_ref(), size2);
    builder.verify_consistency(size1, root1).await.unwrap();

    // Flip a byte of tile (0,0)'s first leaf hash.
    let mut tx = harness.storage.begin().await.unwrap();
    let tile = tx.get_tile(TileId::new(0, 0)).await.unwrap().expect("tile exists");
    let mut bytes = *tile.bottom_row()[0].as_bytes();
    bytes[0] ^= 0xff;
    let tampered = HashTile::from_hashes(
        TileId::new(0, 0),
        std::iter::once(NodeHash::from_bytes(bytes))
            .chain(tile.bottom_row()[1..].iter().copied())
            .collect(),
    );
    tx.write_tile(tampered).await.unwrap();
    tx.commit().await.unwrap();

    let builder = ProofBuilder::new(harness.storage.as_ref(), size2);
    assert!(matches!(
        builder.verify_consistency(size1, root1).await,
        Err(Error::ForkDetected(_))
    ));
}
