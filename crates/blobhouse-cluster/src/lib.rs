//! Blobhouse Cluster Layer
//!
//! Everything that involves more than one node: the membership and
//! transport capabilities the system consumes (both are contracts;
//! concrete view management and RPC live outside this codebase), the
//! master-side replication fan-out, the node-side request handler, and the
//! Merkle-tree repair engine that reconciles replicas.
//!
//! ## Capability seams
//!
//! Three interfaces break what would otherwise be a service cycle
//! (repair ↔ membership ↔ replication):
//!
//! - [`ClusterMembership`]: who is in the view, who is master
//! - [`ClusterTransport`]: per-peer RPC (send, tree, difference, fetch)
//! - [`blobhouse_storage::ReplicationSink`]: implemented here by
//!   [`ReplicationClient`], consumed by the disk writers
//!
//! Concretions are assembled after construction; [`ClusterHandler`] takes
//! its transport via `set_transport` for the same reason.

pub mod error;
pub mod handler;
pub mod membership;
pub mod repair;
pub mod replication;
pub mod transport;

pub use error::{ClusterError, Result};
pub use handler::ClusterHandler;
pub use membership::{ClusterMembership, MembershipRole, Node, Role, StaticMembership};
pub use repair::RepairEngine;
pub use replication::ReplicationClient;
pub use transport::{
    ClusterTransport, DifferenceInfo, InMemoryTransport, MerkleTreeInfo, TransportLog,
};
