//! Index Domain Types
//!
//! The row types persisted by the index store: partitions, index entries and
//! the temp-index rows that bracket in-flight writes.

use blobhouse_core::{Block, MerkleTree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form blob metadata; a key can carry several values (HTTP-header
/// style), so values are lists.
pub type Metadata = BTreeMap<String, Vec<String>>;

/// Identifies one partition file: `(disk, partition)` is unique cluster-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId {
    pub disk: u32,
    pub id: u32,
}

impl PartitionId {
    pub fn new(disk: u32, id: u32) -> Self {
        Self { disk, id }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.disk, self.id)
    }
}

/// Lifecycle of a partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionState {
    /// The one partition per disk currently accepting appends.
    Active,
    /// Append-frozen; only repair and compaction touch it.
    Closed,
    /// Being rewritten by compaction.
    Compacting,
    /// Superseded by compaction; file removal pending.
    Deleted,
}

impl PartitionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionState::Active => "active",
            PartitionState::Closed => "closed",
            PartitionState::Compacting => "compacting",
            PartitionState::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PartitionState::Active),
            "closed" => Some(PartitionState::Closed),
            "compacting" => Some(PartitionState::Compacting),
            "deleted" => Some(PartitionState::Deleted),
            _ => None,
        }
    }
}

/// Partition row: identity, lifecycle state, running size/crc and the
/// cached Merkle tree from the last repair cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub state: PartitionState,
    pub crc: u64,
    pub size: u64,
    pub tree: Option<MerkleTree>,
}

impl Partition {
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            state: PartitionState::Active,
            crc: 0,
            size: 0,
            tree: None,
        }
    }
}

/// One indexed blob: where its payload lives and how to verify it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: i64,
    pub entry_type: i32,
    pub partition: PartitionId,
    pub offset: u64,
    pub length: u64,
    pub crc: u64,
    pub metadata: Metadata,
    pub deleted: bool,
    pub created_at: i64,
}

impl IndexEntry {
    /// The canonical descriptor this entry contributes to its partition's
    /// Merkle tree.
    pub fn as_block(&self) -> Block {
        Block::new(self.id, self.entry_type, self.crc, self.length)
    }
}

/// Durable record of an in-flight write, deleted once the payload append and
/// index insert have both completed. Survivors are replayed at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempIndexEntry {
    pub id: i64,
    pub entry_type: i32,
    pub path: String,
    pub metadata: Metadata,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_state_roundtrip() {
        for state in [
            PartitionState::Active,
            PartitionState::Closed,
            PartitionState::Compacting,
            PartitionState::Deleted,
        ] {
            assert_eq!(PartitionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(PartitionState::parse("bogus"), None);
    }

    #[test]
    fn test_entry_as_block() {
        let entry = IndexEntry {
            id: 7,
            entry_type: 2,
            partition: PartitionId::new(0, 0),
            offset: 100,
            length: 64,
            crc: 0xABCD,
            metadata: Metadata::new(),
            deleted: false,
            created_at: 0,
        };

        assert_eq!(entry.as_block(), Block::new(7, 2, 0xABCD, 64));
    }

    #[test]
    fn test_partition_id_display() {
        assert_eq!(PartitionId::new(3, 14).to_string(), "3/14");
    }
}
