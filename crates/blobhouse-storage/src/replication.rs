//! Replication Writer
//!
//! The single consumer of a node's replication queue. Every inbound
//! [`ReplicationFile`] is self-describing (the master's finished index
//! entry plus the payload), so applying one is: make sure the partition
//! exists locally, write the payload at the offset the master assigned
//! (positional, because the transport does not preserve order across
//! messages), and insert the index entry.
//!
//! Application is idempotent. A redelivered file is skipped when its entry
//! is already present, and a racing insert surfaces as `DuplicateEntry`,
//! which this path swallows. Repair reuses the same queue, so repaired
//! ranges flow through exactly the code path normal replication does.

use crate::config::StorageConfig;
use crate::error::Result;
use crate::file::BlobFile;
use crate::queue::ReplicationQueue;
use crate::storage_file::ReplicationFile;
use blobhouse_index::{IndexError, IndexStore, Partition, PartitionId, PartitionStore};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

pub struct ReplicationWriter {
    config: StorageConfig,
    queue: Arc<ReplicationQueue>,
    index: Arc<dyn IndexStore>,
    partition_store: Arc<dyn PartitionStore>,
    current: Option<BlobFile>,
}

impl ReplicationWriter {
    pub fn new(
        config: StorageConfig,
        queue: Arc<ReplicationQueue>,
        index: Arc<dyn IndexStore>,
        partition_store: Arc<dyn PartitionStore>,
    ) -> Self {
        Self {
            config,
            queue,
            index,
            partition_store,
            current: None,
        }
    }

    /// The replication loop; runs until the task is cancelled by `stop`.
    pub async fn run(mut self) {
        info!("replication writer task started");

        loop {
            let file = self.queue.take().await;
            let started = std::time::Instant::now();

            if let Err(e) = self.apply(&file).await {
                error!(
                    id = file.entry.id,
                    entry_type = file.entry.entry_type,
                    error = %e,
                    "can't write replication file to the storage"
                );
            }

            trace!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "replication file writing finished"
            );
        }
    }

    /// Apply one replicated write locally. Idempotent.
    pub async fn apply(&mut self, file: &ReplicationFile) -> Result<()> {
        let entry = &file.entry;

        if self
            .index
            .get_by_id(entry.id, entry.entry_type)
            .await?
            .is_some()
        {
            debug!(
                id = entry.id,
                entry_type = entry.entry_type,
                "replication file already applied"
            );
            return Ok(());
        }

        // First write for an unseen partition creates it locally.
        self.partition_store
            .add_partition(&Partition::new(entry.partition))
            .await?;

        self.ensure_blob(entry.partition).await?;
        if let Some(blob) = &self.current {
            blob.write_at(entry.offset, &file.data).await?;
        }

        match self.index.add(entry).await {
            Ok(()) => {}
            Err(IndexError::DuplicateEntry { id, entry_type }) => {
                debug!(id, entry_type, "duplicate replication entry swallowed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.grow_partition(entry.partition, entry.offset + entry.length)
            .await?;

        debug!(
            id = entry.id,
            entry_type = entry.entry_type,
            partition = %entry.partition,
            offset = entry.offset,
            length = entry.length,
            "replication file written"
        );

        Ok(())
    }

    async fn ensure_blob(&mut self, partition: PartitionId) -> Result<()> {
        let stale = match &self.current {
            Some(blob) => blob.disk() != partition.disk || blob.partition() != partition.id,
            None => true,
        };
        if stale {
            self.current = Some(
                BlobFile::open(
                    &self.config.data_root,
                    partition.disk,
                    partition.id,
                    self.config.sync_policy,
                )
                .await?,
            );
        }
        Ok(())
    }

    async fn grow_partition(&self, id: PartitionId, end: u64) -> Result<()> {
        if let Some(mut partition) = self.partition_store.partition(id).await? {
            if end > partition.size {
                partition.size = end;
                self.partition_store.update_partition(&partition).await?;
            }
        }
        Ok(())
    }
}
