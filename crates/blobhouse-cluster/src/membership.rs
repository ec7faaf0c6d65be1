//! Cluster Membership Capability
//!
//! Membership and view change are external collaborators: something else
//! decides who is in the cluster and which node is master. This module
//! defines the capability the rest of Blobhouse consumes, a static
//! implementation for fixed deployments and tests, and the adapter that
//! answers the storage crate's master check.

use blobhouse_storage::RoleProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Master,
    Slave,
}

/// One cluster member, addressed by its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub role: Role,
}

impl Node {
    pub fn master(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Master,
        }
    }

    pub fn slave(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Slave,
        }
    }
}

/// Membership queries consumed by replication and repair.
pub trait ClusterMembership: Send + Sync {
    fn self_node(&self) -> Node;

    /// The current master, if the view has one.
    fn master(&self) -> Option<Node>;

    /// Every member of the current view, self included.
    fn peers(&self) -> Vec<Node>;

    fn is_master(&self) -> bool {
        self.self_node().role == Role::Master
    }
}

/// Fixed membership: the view is whatever the configuration says. Suits
/// single-master deployments without dynamic view change, and every test.
pub struct StaticMembership {
    self_node: Node,
    members: Vec<Node>,
}

impl StaticMembership {
    pub fn new(self_node: Node, members: Vec<Node>) -> Self {
        Self { self_node, members }
    }

    /// A one-node master cluster.
    pub fn solo(id: impl Into<String>) -> Self {
        let node = Node::master(id);
        Self {
            self_node: node.clone(),
            members: vec![node],
        }
    }
}

impl ClusterMembership for StaticMembership {
    fn self_node(&self) -> Node {
        self.self_node.clone()
    }

    fn master(&self) -> Option<Node> {
        self.members.iter().find(|n| n.role == Role::Master).cloned()
    }

    fn peers(&self) -> Vec<Node> {
        self.members.clone()
    }
}

/// Adapts membership to the storage crate's [`RoleProvider`] seam.
pub struct MembershipRole(pub Arc<dyn ClusterMembership>);

impl RoleProvider for MembershipRole {
    fn is_master(&self) -> bool {
        self.0.is_master()
    }
}
