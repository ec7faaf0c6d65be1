//! Server Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Startup requires at least one disk under the data root.
    #[error("no disks were found for writer")]
    NoDisks,

    /// A compaction rewrite did not drain through the writer in time.
    #[error("rewrite of partition {partition} timed out")]
    RewriteTimeout { partition: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] blobhouse_storage::Error),

    #[error("index error: {0}")]
    Index(#[from] blobhouse_index::IndexError),

    #[error("cluster error: {0}")]
    Cluster(#[from] blobhouse_cluster::ClusterError),
}
