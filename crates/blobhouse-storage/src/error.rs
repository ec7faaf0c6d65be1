//! Storage Error Types
//!
//! All storage operations return `Result<T>` aliased to `Result<T, Error>`.
//! The writer loops are absorbing: they log these errors and continue, so
//! nothing here carries control flow beyond the single failed item, with
//! one exception, `NoWritableDisk`, which parks the writer until `refresh`
//! brings the disk back.

use blobhouse_index::IndexError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("merkle error: {0}")]
    Core(#[from] blobhouse_core::Error),

    /// The disk is offline or compacting; the writer parks and retries.
    #[error("no writable disk: {0}")]
    NoWritableDisk(u32),

    /// A client write reached a slave; only the master accepts files.
    #[error("node is not the master")]
    NotMaster,

    #[error("invalid storage file: {0}")]
    InvalidStorageFile(String),

    #[error("partition not found: disk={disk} partition={partition}")]
    PartitionNotFound { disk: u32, partition: u32 },
}
