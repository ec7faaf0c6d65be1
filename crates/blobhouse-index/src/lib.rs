//! Blobhouse Index
//!
//! The index is the system's source of truth for *where things are*: the
//! partition files only hold raw payload bytes, so every lookup (serving a
//! read, building a repair tree, deciding a compaction) goes through the
//! tables owned by this crate:
//!
//! - **index entries**: `(id, type) → (partition, offset, length, crc,
//!   metadata, deleted)`
//! - **partitions**: `(disk, partition) → (state, size, crc, cached Merkle
//!   tree)`
//! - **temp index**: in-flight writes bracketing the payload append,
//!   replayed after a crash
//!
//! The store is exposed as two trait-object capabilities (`IndexStore`,
//! `PartitionStore`) so the storage and cluster crates depend on the
//! contract, not on SQLite; tests substitute the in-memory SQLite database.
//!
//! ## Durability
//!
//! `add` returns only after the row is committed. A crash after `add_temp`
//! but before the payload append is recovered by replaying the temp index; a
//! crash after `add` but before `delete_temp` is caught by `add` refusing
//! the duplicate on replay.

pub mod error;
pub mod store;
pub mod tree;
pub mod types;

pub use error::{IndexError, Result};
pub use store::SqliteIndexStore;
pub use tree::build_partition_tree;
pub use types::*;

use async_trait::async_trait;

/// Durable map from `(id, type)` to the blob's location and checksum.
///
/// Implementations must be `Send + Sync`; the disk writers, replication
/// writer and repair cycles all hold the same `Arc<dyn IndexStore>`.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert a new entry. Fails with [`IndexError::DuplicateEntry`] if
    /// `(id, type)` is already present, deleted or not.
    async fn add(&self, entry: &IndexEntry) -> Result<()>;

    async fn get_by_id(&self, id: i64, entry_type: i32) -> Result<Option<IndexEntry>>;

    /// Every type stored under one id; used for deletion cascades.
    async fn list_by_id(&self, id: i64) -> Result<Vec<IndexEntry>>;

    /// All entries of a partition, ordered by `(id, type)`.
    async fn list_by_partition(&self, partition: PartitionId) -> Result<Vec<IndexEntry>>;

    /// Same as [`IndexStore::list_by_partition`] minus tombstoned entries.
    async fn live_list_by_partition(&self, partition: PartitionId) -> Result<Vec<IndexEntry>>;

    /// Smallest and largest id stored in the partition, if any.
    async fn min_max_range(&self, partition: PartitionId) -> Result<Option<(i64, i64)>>;

    /// Total payload bytes of tombstoned entries; drives compaction.
    async fn size_of_deleted(&self, partition: PartitionId) -> Result<u64>;

    /// Tombstone the entry. Idempotent; payload bytes stay until compaction.
    async fn delete(&self, id: i64, entry_type: i32) -> Result<()>;

    /// Clear the tombstone set by [`IndexStore::delete`].
    async fn restore(&self, id: i64, entry_type: i32) -> Result<()>;

    /// Re-point an entry at its rewritten location; the compaction swap.
    async fn move_entry(
        &self,
        id: i64,
        entry_type: i32,
        partition: PartitionId,
        offset: u64,
    ) -> Result<()>;

    async fn add_temp(&self, entry: &TempIndexEntry) -> Result<()>;

    async fn delete_temp(&self, id: i64, entry_type: i32) -> Result<()>;

    /// Oldest surviving temp rows, up to `limit`; replayed at startup.
    async fn temp_index_list(&self, limit: u32) -> Result<Vec<TempIndexEntry>>;

    /// Drop every row. Test fixtures only.
    async fn clear(&self) -> Result<()>;
}

/// Partition rows: the per-disk partition lists and their cached trees.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    async fn add_partition(&self, partition: &Partition) -> Result<()>;

    /// Partitions of one disk ordered by partition id.
    async fn partitions(&self, disk: u32) -> Result<Vec<Partition>>;

    async fn partition(&self, id: PartitionId) -> Result<Option<Partition>>;

    /// Persist the freshly built tree after a repair cycle.
    async fn update_tree(&self, id: PartitionId, tree: &blobhouse_core::MerkleTree) -> Result<()>;

    async fn update_partition(&self, partition: &Partition) -> Result<()>;

    async fn set_state(&self, id: PartitionId, state: PartitionState) -> Result<()>;

    async fn delete_partition(&self, id: PartitionId) -> Result<()>;
}
