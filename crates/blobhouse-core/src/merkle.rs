//! Merkle Tree over Partition Offsets
//!
//! Two replicas of a partition agree on its contents exactly when they agree
//! on every `Block` stored in it. Shipping the whole block list on every
//! repair cycle would be wasteful, so each node summarizes its partition as
//! a fixed-shape hash tree and peers exchange trees instead: equal root
//! hashes prove equality, and a recursive walk of diverging children narrows
//! a mismatch down to the offset windows that actually differ.
//!
//! ## Shape
//!
//! The tree covers a half-open offset range `[lo, hi)`. Leaves are
//! power-of-two aligned windows of `2^max_level` offsets; the final leaf is
//! truncated at `hi`. With `max_level = 5` a range of `[0, 100)` yields the
//! leaves `[0,32) [32,64) [64,96) [96,100)`.
//!
//! A leaf hashes the canonical encodings of every block whose offset falls
//! in its window, in offset order. An empty leaf is the zero hash, and an
//! interior node over two zero hashes stays zero, so empty subtrees compare
//! equal without hashing. The leaf layer is padded to a power of two with
//! zero hashes; padding never reaches the diff output because both sides
//! pad identically.
//!
//! ## Hash function
//!
//! SHA-256 truncated to 128 bits. Truncation keeps wire payloads at
//! 16 bytes per leaf; collision resistance at 128 bits is far beyond what
//! block-level anti-entropy needs. Both peers must use the identical
//! function, concatenation order and empty-leaf rule.
//!
//! Trees with different `(range, max_level)` are incomparable and
//! `difference` refuses them.

use crate::block::Block;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Bytes per hash after truncation.
pub const HASH_LEN: usize = 16;

/// Default leaf level: leaves span 2^15 = 32 768 offsets.
pub const MAX_LEVEL: u32 = 15;

pub type LeafHash = [u8; HASH_LEN];

const ZERO_HASH: LeafHash = [0u8; HASH_LEN];

/// A half-open `[lo, hi)` window of partition offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetRange {
    pub lo: u64,
    pub hi: u64,
}

impl OffsetRange {
    pub fn new(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.lo && offset < self.hi
    }

    pub fn width(&self) -> u64 {
        self.hi - self.lo
    }
}

/// Range-partitioned hash tree over a sorted `offset → Block` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TreeRepr", into = "TreeRepr")]
pub struct MerkleTree {
    range: OffsetRange,
    max_level: u32,
    leaf_count: usize,
    /// levels[0] is the padded leaf layer, the last level is the root.
    levels: Vec<Vec<LeafHash>>,
}

impl MerkleTree {
    /// Build a tree over `[lo, hi)` from the partition's live blocks keyed
    /// by offset. Blocks outside the range are ignored.
    pub fn build(
        range: OffsetRange,
        max_level: u32,
        blocks: &BTreeMap<u64, Block>,
    ) -> Result<Self> {
        if range.hi <= range.lo {
            return Err(Error::InvalidRange {
                lo: range.lo,
                hi: range.hi,
            });
        }
        if max_level >= 63 {
            return Err(Error::InvalidLevel(max_level));
        }

        let span = 1u64 << max_level;
        let leaf_count = range.width().div_ceil(span) as usize;

        let mut leaves = vec![ZERO_HASH; leaf_count.next_power_of_two()];
        let mut index = 0usize;
        let mut hasher: Option<Sha256> = None;

        for (&offset, block) in blocks.range(range.lo..range.hi) {
            let leaf = ((offset - range.lo) / span) as usize;
            if leaf != index {
                if let Some(h) = hasher.take() {
                    leaves[index] = truncate(h.finalize().as_slice());
                }
                index = leaf;
            }
            hasher
                .get_or_insert_with(Sha256::new)
                .update(block.encode());
        }
        if let Some(h) = hasher.take() {
            leaves[index] = truncate(h.finalize().as_slice());
        }

        Ok(Self::from_leaf_layer(range, max_level, leaf_count, leaves))
    }

    /// A tree with every leaf empty; used for partitions with no live data.
    pub fn empty(range: OffsetRange, max_level: u32) -> Result<Self> {
        Self::build(range, max_level, &BTreeMap::new())
    }

    fn from_leaf_layer(
        range: OffsetRange,
        max_level: u32,
        leaf_count: usize,
        leaves: Vec<LeafHash>,
    ) -> Self {
        let mut levels = vec![leaves];
        while levels.last().expect("at least one level").len() > 1 {
            let below = levels.last().expect("at least one level");
            let mut level = Vec::with_capacity(below.len() / 2);
            for pair in below.chunks(2) {
                level.push(combine(&pair[0], &pair[1]));
            }
            levels.push(level);
        }

        Self {
            range,
            max_level,
            leaf_count,
            levels,
        }
    }

    pub fn range(&self) -> OffsetRange {
        self.range
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Number of real (non-padding) leaves.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn root_hash(&self) -> LeafHash {
        self.levels.last().expect("at least one level")[0]
    }

    /// Leaf hashes left-to-right, padding excluded.
    pub fn leaf_hashes(&self) -> &[LeafHash] {
        &self.levels[0][..self.leaf_count]
    }

    /// The offset window covered by leaf `index`.
    pub fn leaf_range(&self, index: usize) -> OffsetRange {
        let span = 1u64 << self.max_level;
        let lo = self.range.lo + index as u64 * span;
        OffsetRange::new(lo, (lo + span).min(self.range.hi))
    }

    fn same_shape(&self, other: &MerkleTree) -> bool {
        self.range == other.range && self.max_level == other.max_level
    }

    /// Offset windows where the two trees disagree: sorted, non-overlapping,
    /// half-open, with adjacent leaf windows coalesced.
    pub fn difference(&self, other: &MerkleTree) -> Result<Vec<OffsetRange>> {
        if !self.same_shape(other) {
            return Err(Error::IncompatibleTrees {
                left: format!(
                    "[{}, {})/{}",
                    self.range.lo, self.range.hi, self.max_level
                ),
                right: format!(
                    "[{}, {})/{}",
                    other.range.lo, other.range.hi, other.max_level
                ),
            });
        }

        let mut ranges = Vec::new();
        let root = self.levels.len() - 1;
        self.walk(other, root, 0, &mut ranges);

        // Coalesce windows that touch; they always arrive sorted.
        let mut merged: Vec<OffsetRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if last.hi == range.lo => last.hi = range.hi,
                _ => merged.push(range),
            }
        }
        Ok(merged)
    }

    fn walk(&self, other: &MerkleTree, level: usize, index: usize, out: &mut Vec<OffsetRange>) {
        if self.levels[level][index] == other.levels[level][index] {
            return;
        }
        if level == 0 {
            if index < self.leaf_count {
                out.push(self.leaf_range(index));
            }
            return;
        }
        self.walk(other, level - 1, index * 2, out);
        self.walk(other, level - 1, index * 2 + 1, out);
    }
}

fn truncate(digest: &[u8]) -> LeafHash {
    let mut hash = ZERO_HASH;
    hash.copy_from_slice(&digest[..HASH_LEN]);
    hash
}

fn combine(left: &LeafHash, right: &LeafHash) -> LeafHash {
    // Empty subtrees stay zero so they compare equal without hashing.
    if *left == ZERO_HASH && *right == ZERO_HASH {
        return ZERO_HASH;
    }
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    truncate(hasher.finalize().as_slice())
}

/// Wire form: range, level and the leaf layer; interior hashes are
/// recomputed on receipt.
#[derive(Serialize, Deserialize, Clone)]
struct TreeRepr {
    lo: u64,
    hi: u64,
    max_level: u32,
    leaves: Vec<LeafHash>,
}

impl From<TreeRepr> for MerkleTree {
    fn from(repr: TreeRepr) -> Self {
        let range = OffsetRange::new(repr.lo, repr.hi);
        let span = 1u64 << repr.max_level.min(62);
        let leaf_count = range.width().max(1).div_ceil(span) as usize;

        let mut leaves = repr.leaves;
        leaves.resize(leaf_count, ZERO_HASH);
        leaves.resize(leaf_count.next_power_of_two(), ZERO_HASH);

        MerkleTree::from_leaf_layer(range, repr.max_level, leaf_count, leaves)
    }
}

impl From<MerkleTree> for TreeRepr {
    fn from(tree: MerkleTree) -> Self {
        TreeRepr {
            lo: tree.range.lo,
            hi: tree.range.hi,
            max_level: tree.max_level,
            leaves: tree.leaf_hashes().to_vec(),
        }
    }
}
