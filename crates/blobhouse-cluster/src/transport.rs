//! Cluster Transport Capability
//!
//! The per-peer RPC surface Blobhouse consumes, and the wire shapes it
//! exchanges. The concrete transport is an external collaborator; the
//! contract here is reliable point-to-point delivery with no ordering
//! across messages, request/response calls with deadlines, and a timeout
//! surfacing as [`ClusterError::PeerUnavailable`].
//!
//! [`InMemoryTransport`] wires a set of in-process nodes together by
//! dispatching straight into each node's [`ClusterHandler`]. It backs the
//! integration tests and single-process deployments, and records every call
//! so tests can assert on protocol traffic.

use crate::error::{ClusterError, Result};
use crate::handler::ClusterHandler;
use crate::membership::Node;
use async_trait::async_trait;
use blobhouse_core::{MerkleTree, OffsetRange};
use blobhouse_storage::ReplicationFile;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One partition's tree, as served to a repairing peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleTreeInfo {
    pub disk: u32,
    pub partition: u32,
    pub tree: MerkleTree,
}

/// The offset windows where a replica diverges from its master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferenceInfo {
    pub disk: u32,
    pub partition: u32,
    pub ranges: Vec<OffsetRange>,
}

/// Per-peer RPC operations.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// One-way, best-effort delivery of a finished write.
    async fn send_replication(&self, peer: &Node, file: ReplicationFile) -> Result<()>;

    async fn get_merkle_tree_info(
        &self,
        peer: &Node,
        disk: u32,
        partition: u32,
    ) -> Result<MerkleTreeInfo>;

    /// Ask `peer` how far its copy of the partition diverges from its
    /// master's.
    async fn get_difference(&self, peer: &Node, disk: u32, partition: u32)
        -> Result<DifferenceInfo>;

    /// Bulk payload pull for repair: every live entry of the partition whose
    /// offset falls in one of `ranges`.
    async fn fetch_range(
        &self,
        peer: &Node,
        disk: u32,
        partition: u32,
        ranges: &[OffsetRange],
    ) -> Result<Vec<ReplicationFile>>;
}

/// Record of the calls a test run produced.
#[derive(Debug, Default, Clone)]
pub struct TransportLog {
    pub tree_requests: Vec<(String, u32, u32)>,
    pub difference_requests: Vec<(String, u32, u32)>,
    pub fetch_requests: Vec<(String, u32, u32, Vec<OffsetRange>)>,
    pub replication_sends: Vec<String>,
}

/// In-process transport: peers are handlers registered under their node id.
#[derive(Default)]
pub struct InMemoryTransport {
    handlers: RwLock<HashMap<String, Arc<ClusterHandler>>>,
    log: Mutex<TransportLog>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, node_id: impl Into<String>, handler: Arc<ClusterHandler>) {
        self.handlers.write().await.insert(node_id.into(), handler);
    }

    pub async fn log(&self) -> TransportLog {
        self.log.lock().await.clone()
    }

    async fn handler(&self, peer: &Node) -> Result<Arc<ClusterHandler>> {
        self.handlers
            .read()
            .await
            .get(&peer.id)
            .cloned()
            .ok_or_else(|| ClusterError::PeerUnavailable(peer.id.clone()))
    }
}

#[async_trait]
impl ClusterTransport for InMemoryTransport {
    async fn send_replication(&self, peer: &Node, file: ReplicationFile) -> Result<()> {
        let handler = self.handler(peer).await?;
        self.log.lock().await.replication_sends.push(peer.id.clone());
        handler.receive_replication(file).await;
        Ok(())
    }

    async fn get_merkle_tree_info(
        &self,
        peer: &Node,
        disk: u32,
        partition: u32,
    ) -> Result<MerkleTreeInfo> {
        let handler = self.handler(peer).await?;
        self.log
            .lock()
            .await
            .tree_requests
            .push((peer.id.clone(), disk, partition));
        handler.merkle_tree_info(disk, partition).await
    }

    async fn get_difference(
        &self,
        peer: &Node,
        disk: u32,
        partition: u32,
    ) -> Result<DifferenceInfo> {
        let handler = self.handler(peer).await?;
        self.log
            .lock()
            .await
            .difference_requests
            .push((peer.id.clone(), disk, partition));
        handler.difference(disk, partition).await
    }

    async fn fetch_range(
        &self,
        peer: &Node,
        disk: u32,
        partition: u32,
        ranges: &[OffsetRange],
    ) -> Result<Vec<ReplicationFile>> {
        let handler = self.handler(peer).await?;
        self.log
            .lock()
            .await
            .fetch_requests
            .push((peer.id.clone(), disk, partition, ranges.to_vec()));
        handler.fetch_range(disk, partition, ranges).await
    }
}
