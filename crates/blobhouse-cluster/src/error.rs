//! Cluster Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// The peer did not answer in time; repair skips the partition for
    /// this cycle.
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),

    #[error("no master in the current view")]
    NoMaster,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(#[from] blobhouse_storage::Error),

    #[error("index error: {0}")]
    Index(#[from] blobhouse_index::IndexError),

    #[error("merkle error: {0}")]
    Core(#[from] blobhouse_core::Error),
}
