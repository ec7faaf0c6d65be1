//! Partition Tree Construction
//!
//! Maps a partition's live index entries into the `offset → Block` form the
//! Merkle tree hashes. Both sides of a repair exchange build their tree with
//! the same `(range, max_level)`, taken from shared configuration, so the
//! trees stay comparable even while the replicas disagree on content.

use crate::types::IndexEntry;
use blobhouse_core::{Block, MerkleTree, OffsetRange};
use std::collections::BTreeMap;

/// Build the Merkle tree summarizing `entries` over `range`.
///
/// Entries are consumed in `(id, type)` order, so when two entries claim
/// the same offset (a corrupt index) the surviving block is still the same
/// on every replica.
pub fn build_partition_tree(
    entries: &[IndexEntry],
    range: OffsetRange,
    max_level: u32,
) -> blobhouse_core::Result<MerkleTree> {
    let mut ordered: Vec<&IndexEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| a.as_block().cmp_by_id_type(&b.as_block()));

    let blocks: BTreeMap<u64, Block> = ordered
        .into_iter()
        .map(|entry| (entry.offset, entry.as_block()))
        .collect();

    MerkleTree::build(range, max_level, &blocks)
}
