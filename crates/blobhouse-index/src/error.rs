//! Index Error Types
//!
//! All index operations return `Result<T>` aliased to
//! `Result<T, IndexError>`, allowing `?` propagation into the storage and
//! cluster crates which wrap this enum with `#[from]`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    /// `(id, type)` is already present. Fatal on the master write path,
    /// swallowed on the replication path.
    #[error("duplicate index entry: id={id} type={entry_type}")]
    DuplicateEntry { id: i64, entry_type: i32 },

    #[error("index entry not found: id={id} type={entry_type}")]
    EntryNotFound { id: i64, entry_type: i32 },

    #[error("partition not found: disk={disk} partition={partition}")]
    PartitionNotFound { disk: u32, partition: u32 },

    /// Startup found rows the store cannot interpret; fatal.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
