//! Node-Side Cluster Handler
//!
//! The operations a node *serves* to its peers: tree requests, divergence
//! reports, bulk payload pulls for repair, and inbound replication. A
//! concrete transport dispatches received requests here; the in-memory
//! transport calls it directly.
//!
//! The handler needs the transport back (a divergence report compares the
//! local tree against the master's), which would be a construction cycle,
//! so the transport is injected after assembly via `set_transport`.

use crate::error::{ClusterError, Result};
use crate::membership::ClusterMembership;
use crate::transport::{ClusterTransport, DifferenceInfo, MerkleTreeInfo};
use blobhouse_core::{MerkleTree, OffsetRange};
use blobhouse_index::{build_partition_tree, IndexStore, PartitionId};
use blobhouse_storage::{file, ReplicationFile, ReplicationQueue, StorageConfig};
use std::sync::{Arc, OnceLock};
use tracing::debug;

pub struct ClusterHandler {
    config: StorageConfig,
    membership: Arc<dyn ClusterMembership>,
    index: Arc<dyn IndexStore>,
    replication_queue: Arc<ReplicationQueue>,
    transport: OnceLock<Arc<dyn ClusterTransport>>,
}

impl ClusterHandler {
    pub fn new(
        config: StorageConfig,
        membership: Arc<dyn ClusterMembership>,
        index: Arc<dyn IndexStore>,
        replication_queue: Arc<ReplicationQueue>,
    ) -> Self {
        Self {
            config,
            membership,
            index,
            replication_queue,
            transport: OnceLock::new(),
        }
    }

    /// Close the service cycle after assembly; later calls are ignored.
    pub fn set_transport(&self, transport: Arc<dyn ClusterTransport>) {
        let _ = self.transport.set(transport);
    }

    fn tree_range(&self) -> OffsetRange {
        OffsetRange::new(0, self.config.max_partition_size)
    }

    /// The local tree of one partition, built from live index entries.
    pub async fn local_tree(&self, disk: u32, partition: u32) -> Result<MerkleTree> {
        let entries = self
            .index
            .live_list_by_partition(PartitionId::new(disk, partition))
            .await?;
        Ok(build_partition_tree(
            &entries,
            self.tree_range(),
            self.config.merkle_max_level,
        )?)
    }

    /// Serve this node's tree for a partition.
    pub async fn merkle_tree_info(&self, disk: u32, partition: u32) -> Result<MerkleTreeInfo> {
        Ok(MerkleTreeInfo {
            disk,
            partition,
            tree: self.local_tree(disk, partition).await?,
        })
    }

    /// Report how far this node's copy diverges from its master's.
    pub async fn difference(&self, disk: u32, partition: u32) -> Result<DifferenceInfo> {
        let master = self.membership.master().ok_or(ClusterError::NoMaster)?;
        if master.id == self.membership.self_node().id {
            // The master never diverges from itself.
            return Ok(DifferenceInfo {
                disk,
                partition,
                ranges: Vec::new(),
            });
        }

        let transport = self
            .transport
            .get()
            .ok_or_else(|| ClusterError::Transport("transport not wired".to_string()))?;

        let local = self.local_tree(disk, partition).await?;
        let master_info = transport
            .get_merkle_tree_info(&master, disk, partition)
            .await?;

        Ok(DifferenceInfo {
            disk,
            partition,
            ranges: local.difference(&master_info.tree)?,
        })
    }

    /// Serve the live entries (with payloads) whose offsets fall in the
    /// requested windows.
    pub async fn fetch_range(
        &self,
        disk: u32,
        partition: u32,
        ranges: &[OffsetRange],
    ) -> Result<Vec<ReplicationFile>> {
        let entries = self
            .index
            .live_list_by_partition(PartitionId::new(disk, partition))
            .await?;

        let mut files = Vec::new();
        for entry in entries {
            if !ranges.iter().any(|r| r.contains(entry.offset)) {
                continue;
            }
            let data = file::read_range(
                &self.config.data_root,
                disk,
                partition,
                entry.offset,
                entry.length,
            )
            .await?;
            files.push(ReplicationFile { entry, data });
        }

        debug!(
            disk,
            partition,
            ranges = ranges.len(),
            files = files.len(),
            "repair range served"
        );
        Ok(files)
    }

    /// Inbound replication: enqueue for the replication writer.
    pub async fn receive_replication(&self, file: ReplicationFile) {
        self.replication_queue.push(file).await;
    }
}
