//! Replication Client
//!
//! Master-side fan-out: every finished write is dispatched to every peer in
//! the current view except the local node, concurrently. Delivery is
//! best-effort: a failed or slow peer is logged and left to the repair
//! cycle; the write path never blocks on it.

use crate::membership::ClusterMembership;
use crate::transport::ClusterTransport;
use async_trait::async_trait;
use blobhouse_storage::{ReplicationFile, ReplicationSink};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ReplicationClient {
    membership: Arc<dyn ClusterMembership>,
    transport: Arc<dyn ClusterTransport>,
}

impl ReplicationClient {
    pub fn new(
        membership: Arc<dyn ClusterMembership>,
        transport: Arc<dyn ClusterTransport>,
    ) -> Self {
        Self {
            membership,
            transport,
        }
    }
}

#[async_trait]
impl ReplicationSink for ReplicationClient {
    async fn replicate(&self, file: ReplicationFile) {
        let self_id = self.membership.self_node().id;
        let peers: Vec<_> = self
            .membership
            .peers()
            .into_iter()
            .filter(|peer| peer.id != self_id)
            .collect();

        if peers.is_empty() {
            return;
        }

        let sends = peers.iter().map(|peer| {
            let file = file.clone();
            async move {
                if let Err(e) = self.transport.send_replication(peer, file).await {
                    warn!(peer = %peer.id, error = %e, "replication send failed");
                }
            }
        });
        join_all(sends).await;

        debug!(
            id = file.entry.id,
            entry_type = file.entry.entry_type,
            peers = peers.len(),
            "write replicated"
        );
    }
}
