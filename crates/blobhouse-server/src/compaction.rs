//! Compaction Service (master only)
//!
//! Deleted blobs keep their payload bytes until compaction reclaims them.
//! Each cycle scans the closed partitions of every disk; when a partition's
//! deleted fraction exceeds the configured ratio, its live entries are
//! re-enqueued onto the disk's write queue as compaction copies. The disk
//! writer appends them into the current active partition and re-points
//! their index rows, after which the old partition row and blob file are
//! removed.
//!
//! Interruption is safe: a partition left in `Compacting` still has its
//! remaining live entries pointing at it, so the next cycle resumes the
//! rewrite; already-moved entries no longer appear in its live list.

use crate::config::CompactionConfig;
use crate::error::{Result, ServerError};
use blobhouse_index::{IndexStore, Partition, PartitionState, PartitionStore};
use blobhouse_storage::{file, DiskService, Error, StorageConfig, StorageFile, WriteQueue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared map of per-disk write queues, owned by the server.
pub type WriteQueues = Arc<RwLock<HashMap<u32, Arc<WriteQueue>>>>;

pub struct CompactionService {
    config: CompactionConfig,
    storage_config: StorageConfig,
    index: Arc<dyn IndexStore>,
    partition_store: Arc<dyn PartitionStore>,
    disks: Arc<DiskService>,
    write_queues: WriteQueues,
}

impl CompactionService {
    pub fn new(
        config: CompactionConfig,
        storage_config: StorageConfig,
        index: Arc<dyn IndexStore>,
        partition_store: Arc<dyn PartitionStore>,
        disks: Arc<DiskService>,
        write_queues: WriteQueues,
    ) -> Self {
        Self {
            config,
            storage_config,
            index,
            partition_store,
            disks,
            write_queues,
        }
    }

    /// Scan every disk once and compact what qualifies.
    pub async fn run_cycle(&self) {
        for disk in self.disks.disks().await {
            if let Err(e) = self.compact_disk(disk).await {
                warn!(disk, error = %e, "compaction cycle failed for disk");
            }
        }
    }

    async fn compact_disk(&self, disk: u32) -> Result<()> {
        for partition in self.partition_store.partitions(disk).await? {
            let resumable = partition.state == PartitionState::Compacting;
            if partition.state != PartitionState::Closed && !resumable {
                continue;
            }

            if resumable || self.qualifies(&partition).await? {
                if let Err(e) = self.compact_partition(&partition).await {
                    warn!(
                        partition = %partition.id,
                        error = %e,
                        "partition compaction failed"
                    );
                }
            }
        }
        Ok(())
    }

    async fn qualifies(&self, partition: &Partition) -> Result<bool> {
        if partition.size == 0 {
            return Ok(false);
        }
        let deleted = self.index.size_of_deleted(partition.id).await?;
        let ratio = deleted as f64 / partition.size as f64;

        debug!(partition = %partition.id, ratio, "compaction ratio");
        Ok(ratio > self.config.deleted_ratio)
    }

    async fn compact_partition(&self, partition: &Partition) -> Result<()> {
        let id = partition.id;
        info!(partition = %id, "compacting partition");

        self.partition_store
            .set_state(id, PartitionState::Compacting)
            .await?;

        let queue = self
            .write_queues
            .read()
            .await
            .get(&id.disk)
            .cloned()
            .ok_or(Error::NoWritableDisk(id.disk))?;

        // Re-enqueue every live entry as a compaction copy; the disk writer
        // appends it to the active partition and re-points the index row.
        let live = self.index.live_list_by_partition(id).await?;
        for entry in &live {
            let data = file::read_range(
                &self.storage_config.data_root,
                id.disk,
                id.id,
                entry.offset,
                entry.length,
            )
            .await?;

            let copy = StorageFile::builder()
                .id(entry.id)
                .entry_type(entry.entry_type)
                .metadata(entry.metadata.clone())
                .data(data)
                .compaction(true)
                .build()?;
            queue.push(copy).await;
        }

        self.await_rewrite(id).await?;

        // The swap is durable; the old partition can go.
        self.partition_store
            .set_state(id, PartitionState::Deleted)
            .await?;
        file::delete_blob(&self.storage_config.data_root, id.disk, id.id).await?;
        self.partition_store.delete_partition(id).await?;

        info!(partition = %id, moved = live.len(), "partition compacted");
        Ok(())
    }

    /// Wait until the writer has re-pointed every live entry away from the
    /// partition being rewritten.
    async fn await_rewrite(&self, id: blobhouse_index::PartitionId) -> Result<()> {
        let deadline = Duration::from_millis(self.config.rewrite_timeout_ms);
        let started = std::time::Instant::now();

        loop {
            if self.index.live_list_by_partition(id).await?.is_empty() {
                return Ok(());
            }
            if started.elapsed() > deadline {
                return Err(ServerError::RewriteTimeout {
                    partition: id.to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Periodic driver, started on the master only.
    pub fn start(
        self: Arc<Self>,
        shutdown_rx: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(self.config.check_interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut shutdown_rx = shutdown_rx;

            info!(
                interval_ms = self.config.check_interval_ms,
                "compaction service started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_cycle().await;
                    }
                    _ = &mut shutdown_rx => {
                        info!("compaction service shutting down");
                        break;
                    }
                }
            }
        })
    }
}
