//! Storage Configuration
//!
//! Controls the write path: where partition files live, when partitions
//! rotate, how hard the writers fsync, and how deep the bounded queues are.
//!
//! ## Usage
//!
//! ```ignore
//! use blobhouse_storage::StorageConfig;
//!
//! // Test config: small partitions, immediate fsync
//! let config = StorageConfig {
//!     data_root: temp_dir.path().to_path_buf(),
//!     max_partition_size: 1024,
//!     sync_policy: SyncPolicy::Always,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; each disk is a numbered subdirectory beneath it.
    pub data_root: PathBuf,

    /// Rotate the active partition before a write would push it past this
    /// many bytes (default: 256MB).
    #[serde(default = "default_max_partition_size")]
    pub max_partition_size: u64,

    /// Delay before a freshly added disk's writer task starts taking work
    /// (default: 1s).
    #[serde(default = "default_writer_task_start_delay_ms")]
    pub writer_task_start_delay_ms: u64,

    /// Upper bound on concurrently scheduled writer tasks (default: 16).
    #[serde(default = "default_writer_pool_size")]
    pub writer_pool_size: usize,

    /// Merkle leaf level shared by every node in the cluster (default: 15,
    /// 32 768-offset leaves). Changing it invalidates all cached trees.
    #[serde(default = "default_merkle_max_level")]
    pub merkle_max_level: u32,

    /// Capacity of each disk's write queue; a full queue blocks the
    /// producer, which is the ingest backpressure (default: 1024).
    #[serde(default = "default_queue_capacity")]
    pub write_queue_capacity: usize,

    /// Capacity of the node's replication queue (default: 4096).
    #[serde(default = "default_replication_queue_capacity")]
    pub replication_queue_capacity: usize,

    /// fsync policy for partition appends.
    #[serde(default)]
    pub sync_policy: SyncPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            max_partition_size: default_max_partition_size(),
            writer_task_start_delay_ms: default_writer_task_start_delay_ms(),
            writer_pool_size: default_writer_pool_size(),
            merkle_max_level: default_merkle_max_level(),
            write_queue_capacity: default_queue_capacity(),
            replication_queue_capacity: default_replication_queue_capacity(),
            sync_policy: SyncPolicy::default(),
        }
    }
}

/// fsync policy for partition file appends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncPolicy {
    /// Sync after every append (safest, slowest).
    Always,

    /// Sync at most every N milliseconds (balanced).
    Interval { interval_ms: u64 },

    /// Never sync explicitly (testing only).
    Never,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::Interval { interval_ms: 100 }
    }
}

impl SyncPolicy {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            SyncPolicy::Interval { interval_ms } => Some(Duration::from_millis(*interval_ms)),
            _ => None,
        }
    }
}

fn default_max_partition_size() -> u64 {
    256 * 1024 * 1024 // 256MB
}

fn default_writer_task_start_delay_ms() -> u64 {
    1000
}

fn default_writer_pool_size() -> usize {
    16
}

fn default_merkle_max_level() -> u32 {
    blobhouse_core::MAX_LEVEL
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_replication_queue_capacity() -> usize {
    4096
}
