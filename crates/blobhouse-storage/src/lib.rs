//! Blobhouse Storage Layer
//!
//! This crate owns everything that touches a disk: the append-only
//! partition blob files, the per-disk writer loops, the bounded queues that
//! throttle ingest, and the replication writer that applies peers' writes.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐   WriteQueue    ┌──────────────┐
//! │ ingest layer │ ──────────────▶ │ DiskWriter   │  (one per disk)
//! └──────────────┘   (bounded)     │ - temp row   │
//!                                  │ - append+crc │
//!                                  │ - index add  │
//!                                  │ - replicate ─┼──▶ ReplicationSink
//!                                  └──────┬───────┘
//!                                         │ rotation
//!                                  ┌──────▼───────────┐
//!                                  │ PartitionRegistry │
//!                                  └──────────────────┘
//!
//! ┌──────────────┐ ReplicationQueue ┌───────────────────┐
//! │ peers        │ ───────────────▶ │ ReplicationWriter │  (one per node)
//! └──────────────┘    (bounded)     │ - positional write │
//!                                   │ - idempotent add   │
//!                                   └───────────────────┘
//! ```
//!
//! ## Single-writer discipline
//!
//! At most one task appends to a given disk's partition files. Everything
//! the write path guarantees (dense offsets, index entries becoming
//! visible in append order, race-free rotation) follows from that one
//! rule. Readers open independent read-only handles.
//!
//! The cluster crate plugs in through two capability traits defined here,
//! [`ReplicationSink`] and [`RoleProvider`], which keeps the dependency
//! graph acyclic: storage never links against membership or transport.

pub mod config;
pub mod disk;
pub mod error;
pub mod file;
pub mod partition;
pub mod queue;
pub mod replication;
pub mod storage_file;
pub mod writer;

pub use config::{StorageConfig, SyncPolicy};
pub use disk::{Disk, DiskService};
pub use error::{Error, Result};
pub use file::BlobFile;
pub use partition::PartitionRegistry;
pub use queue::{BoundedQueue, ReplicationQueue, WriteQueue};
pub use replication::ReplicationWriter;
pub use storage_file::{ReplicationFile, StorageFile, StorageFileBuilder, AUTH_TOKEN_KEY};
pub use writer::DiskWriter;

use async_trait::async_trait;

/// Where the disk writer hands finished writes for fan-out to peers.
/// Implemented by the cluster crate's replication client; tests collect.
#[async_trait]
pub trait ReplicationSink: Send + Sync {
    /// Best-effort: implementations log failures and never block the write
    /// path on a slow peer.
    async fn replicate(&self, file: ReplicationFile);
}

/// Answers "is this node currently the master?". Implemented by cluster
/// membership; the disk writer consults it before accepting client writes.
pub trait RoleProvider: Send + Sync {
    fn is_master(&self) -> bool;
}
