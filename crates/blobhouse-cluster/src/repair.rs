//! Repair Engine
//!
//! The anti-entropy loop. Each cycle, for every local disk and every
//! partition on it:
//!
//! 1. Summarize the local copy as a Merkle tree (the cached tree from the
//!    partition row when present, rebuilt from live index entries
//!    otherwise).
//! 2. Fetch the master's tree for the same partition.
//! 3. *Active* partition: compare only. It is still taking writes, so
//!    material repair is deferred to the next rotation; divergence is just
//!    noted.
//! 4. *Closed* partition: compute the divergent offset windows, pull the
//!    corresponding entries and payloads from the master, and feed them
//!    through the replication queue, so repaired data takes exactly the
//!    normal replication path. The master's tree is then persisted on the
//!    partition row.
//!
//! Failure isolation: one failed partition never aborts the cycle, an
//! unavailable master skips the disk for the cycle, and incompatible trees
//! (mismatched configuration) skip the partition with a log line. Per-disk
//! repair is serialized; distinct disks repair in parallel.

use crate::error::{ClusterError, Result};
use crate::membership::{ClusterMembership, Node};
use crate::transport::ClusterTransport;
use blobhouse_core::MerkleTree;
use blobhouse_index::{
    build_partition_tree, IndexStore, Partition, PartitionState, PartitionStore,
};
use blobhouse_storage::{DiskService, ReplicationQueue, StorageConfig};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct RepairEngine {
    config: StorageConfig,
    membership: Arc<dyn ClusterMembership>,
    transport: Arc<dyn ClusterTransport>,
    index: Arc<dyn IndexStore>,
    partition_store: Arc<dyn PartitionStore>,
    disks: Arc<DiskService>,
    replication_queue: Arc<ReplicationQueue>,
    disk_locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
}

impl RepairEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StorageConfig,
        membership: Arc<dyn ClusterMembership>,
        transport: Arc<dyn ClusterTransport>,
        index: Arc<dyn IndexStore>,
        partition_store: Arc<dyn PartitionStore>,
        disks: Arc<DiskService>,
        replication_queue: Arc<ReplicationQueue>,
    ) -> Self {
        Self {
            config,
            membership,
            transport,
            index,
            partition_store,
            disks,
            replication_queue,
            disk_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one repair cycle over every local disk, disks in parallel.
    pub async fn repair(&self) {
        let disks = self.disks.disks().await;

        let cycles = disks.into_iter().map(|disk| async move {
            if let Err(e) = self.repair_disk(disk).await {
                warn!(disk, error = %e, "repair cycle failed for disk");
            }
        });
        join_all(cycles).await;
    }

    /// Repair one disk; concurrent calls for the same disk serialize.
    pub async fn repair_disk(&self, disk: u32) -> Result<()> {
        let lock = {
            let mut locks = self.disk_locks.lock().await;
            Arc::clone(locks.entry(disk).or_default())
        };
        let _guard = lock.lock().await;

        let master = match self.membership.master() {
            Some(master) => master,
            None => {
                debug!(disk, "no master in view, skipping repair");
                return Ok(());
            }
        };
        if master.id == self.membership.self_node().id {
            // The master is the reference copy; nothing to reconcile against.
            return Ok(());
        }

        for partition in self.partition_store.partitions(disk).await? {
            if partition.state == PartitionState::Deleted {
                continue;
            }
            if let Err(e) = self.repair_partition(&master, &partition).await {
                match e {
                    ClusterError::PeerUnavailable(_) => {
                        warn!(disk, error = %e, "master unavailable, skipping disk this cycle");
                        return Ok(());
                    }
                    _ => warn!(
                        disk,
                        partition = partition.id.id,
                        error = %e,
                        "partition repair failed"
                    ),
                }
            }
        }
        Ok(())
    }

    async fn repair_partition(&self, master: &Node, partition: &Partition) -> Result<()> {
        let id = partition.id;
        let active = partition.state == PartitionState::Active;

        let local = self.local_tree(partition).await?;
        let master_info = self
            .transport
            .get_merkle_tree_info(master, id.disk, id.id)
            .await?;

        let difference = local.difference(&master_info.tree)?;

        if active {
            // Still receiving writes; reconciliation waits for rotation.
            if !difference.is_empty() {
                debug!(
                    partition = %id,
                    ranges = difference.len(),
                    "active partition diverges, repair deferred to rotation"
                );
            }
            return Ok(());
        }

        if difference.is_empty() {
            self.partition_store.update_tree(id, &local).await?;
            return Ok(());
        }

        info!(partition = %id, ranges = difference.len(), "partition diverges, repairing");

        let files = self
            .transport
            .fetch_range(master, id.disk, id.id, &difference)
            .await?;
        let count = files.len();
        for file in files {
            self.replication_queue.push(file).await;
        }

        // Record the state this partition converges to, so the next cycle
        // compares equal without refetching payloads.
        self.partition_store
            .update_tree(id, &master_info.tree)
            .await?;

        info!(partition = %id, files = count, "repair applied");
        Ok(())
    }

    async fn local_tree(&self, partition: &Partition) -> Result<MerkleTree> {
        // Closed partitions only change through repair itself, so the tree
        // cached on the row is trustworthy; active partitions rebuild.
        if partition.state == PartitionState::Closed {
            if let Some(tree) = &partition.tree {
                return Ok(tree.clone());
            }
        }

        let entries = self.index.live_list_by_partition(partition.id).await?;
        Ok(build_partition_tree(
            &entries,
            blobhouse_core::OffsetRange::new(0, self.config.max_partition_size),
            self.config.merkle_max_level,
        )?)
    }

    /// Periodic repair driver; mirrors the compaction scheduler's shape.
    pub fn start(
        self: Arc<Self>,
        period: Duration,
        shutdown_rx: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut shutdown_rx = shutdown_rx;

            info!(period_ms = period.as_millis() as u64, "repair engine started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.repair().await;
                    }
                    _ = &mut shutdown_rx => {
                        info!("repair engine shutting down");
                        break;
                    }
                }
            }
        })
    }
}
