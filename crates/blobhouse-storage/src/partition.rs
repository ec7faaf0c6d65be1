//! Partition Registry
//!
//! Owns the per-disk partition lifecycle: which partition is *active* (the
//! one accepting appends), when to rotate, and the bookkeeping a rotation
//! entails: freezing the old partition, computing its file crc, building
//! and persisting its Merkle tree, and creating the successor row.
//!
//! Partition ids on a disk are dense and increasing. The active partition is
//! the greatest id still below `max_partition_size`; everything older is
//! append-frozen. Rotation is atomic with respect to the disk's writer
//! because the writer is the only caller on its disk.

use crate::config::StorageConfig;
use crate::error::Result;
use crate::file;
use blobhouse_core::OffsetRange;
use blobhouse_index::{
    build_partition_tree, IndexStore, Partition, PartitionId, PartitionState, PartitionStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub struct PartitionRegistry {
    partition_store: Arc<dyn PartitionStore>,
    index: Arc<dyn IndexStore>,
    config: StorageConfig,
    active: Mutex<HashMap<u32, Partition>>,
}

impl PartitionRegistry {
    pub fn new(
        partition_store: Arc<dyn PartitionStore>,
        index: Arc<dyn IndexStore>,
        config: StorageConfig,
    ) -> Self {
        Self {
            partition_store,
            index,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// The offset range every partition tree is built over. Shared
    /// cluster-wide so trees from different replicas stay comparable.
    pub fn tree_range(&self) -> OffsetRange {
        OffsetRange::new(0, self.config.max_partition_size)
    }

    /// The disk's active partition, creating `(disk, 0)` or the next id if
    /// none is active yet.
    pub async fn get_or_create_active(&self, disk: u32) -> Result<Partition> {
        let mut active = self.active.lock().await;
        if let Some(partition) = active.get(&disk) {
            return Ok(partition.clone());
        }

        let known = self.partition_store.partitions(disk).await?;
        let candidate = known
            .iter()
            .filter(|p| p.state == PartitionState::Active)
            .max_by_key(|p| p.id.id)
            .cloned();

        let partition = match candidate {
            Some(mut partition) => {
                // The row's size can lag a crash; the file is authoritative.
                if let Some(size) =
                    file::file_size(&self.config.data_root, disk, partition.id.id).await?
                {
                    partition.size = partition.size.max(size);
                }
                partition
            }
            None => {
                let next_id = known.iter().map(|p| p.id.id + 1).max().unwrap_or(0);
                self.create_partition(disk, next_id).await?
            }
        };

        active.insert(disk, partition.clone());
        Ok(partition)
    }

    /// True when appending `incoming` bytes must rotate first. An oversized
    /// blob still lands in an empty partition rather than rotating forever.
    pub async fn should_rotate(&self, disk: u32, incoming: u64) -> Result<bool> {
        let partition = self.get_or_create_active(disk).await?;
        Ok(partition.size > 0 && partition.size + incoming > self.config.max_partition_size)
    }

    /// Record `appended` bytes landing in the disk's active partition.
    pub async fn record_append(&self, disk: u32, appended: u64) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(partition) = active.get_mut(&disk) {
            partition.size += appended;
        }
        Ok(())
    }

    /// Freeze the active partition and open its successor. The frozen
    /// partition gets its file crc and a freshly built Merkle tree persisted
    /// on its row, so repair can short-circuit comparisons.
    pub async fn rotate(&self, disk: u32) -> Result<Partition> {
        let mut frozen = self.get_or_create_active(disk).await?;

        frozen.state = PartitionState::Closed;
        frozen.crc = self.file_crc(disk, frozen.id.id).await?;
        self.partition_store.update_partition(&frozen).await?;

        let entries = self.index.live_list_by_partition(frozen.id).await?;
        let tree = build_partition_tree(&entries, self.tree_range(), self.config.merkle_max_level)?;
        self.partition_store.update_tree(frozen.id, &tree).await?;

        let id_range = self.index.min_max_range(frozen.id).await?;

        let next = self.create_partition(disk, frozen.id.id + 1).await?;
        self.active.lock().await.insert(disk, next.clone());

        info!(
            disk,
            frozen = frozen.id.id,
            active = next.id.id,
            frozen_size = frozen.size,
            min_id = id_range.map(|r| r.0).unwrap_or(0),
            max_id = id_range.map(|r| r.1).unwrap_or(0),
            "partition sealed and rotated"
        );

        Ok(next)
    }

    /// Create a fresh active partition row; used by rotation and by
    /// compaction when it needs a rewrite target.
    pub async fn create_partition(&self, disk: u32, id: u32) -> Result<Partition> {
        let partition = Partition::new(PartitionId::new(disk, id));
        self.partition_store.add_partition(&partition).await?;
        info!(disk, partition = id, "partition created");
        Ok(partition)
    }

    /// Drop the cached active pointer, forcing a reload on next access.
    pub async fn invalidate(&self, disk: u32) {
        self.active.lock().await.remove(&disk);
    }

    async fn file_crc(&self, disk: u32, partition: u32) -> Result<u64> {
        let size = file::file_size(&self.config.data_root, disk, partition)
            .await?
            .unwrap_or(0);
        if size == 0 {
            return Ok(0);
        }

        let data = file::read_range(&self.config.data_root, disk, partition, 0, size).await?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data);
        Ok(hasher.finalize() as u64)
    }
}
