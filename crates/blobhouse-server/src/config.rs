//! Server Configuration
//!
//! Aggregates the storage knobs with the node's cluster identity and the
//! background-task schedules. Loadable from a JSON file; every field not
//! present falls back to its default, so a minimal config is just a node id
//! and a data root.

use blobhouse_storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// This node's id within the cluster.
    pub node_id: String,

    /// Whether this node is the master. Ignored when `members` names one.
    #[serde(default)]
    pub is_master: bool,

    /// The static cluster view. Empty means a solo master node.
    #[serde(default)]
    pub members: Vec<MemberConfig>,

    /// Index database path; `None` uses an in-memory database (tests).
    #[serde(default)]
    pub index_db: Option<PathBuf>,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Period between repair cycles (default: 60s).
    #[serde(default = "default_repair_period_ms")]
    pub repair_period_ms: u64,

    /// Grace period during `stop` between queue drain and task cancel
    /// (default: 2s).
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    #[serde(default)]
    pub compaction: CompactionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: "node-0".to_string(),
            is_master: true,
            members: Vec::new(),
            index_db: None,
            storage: StorageConfig::default(),
            repair_period_ms: default_repair_period_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            compaction: CompactionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: String,
    #[serde(default)]
    pub master: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// How often the master scans for compactable partitions (default: 5m).
    #[serde(default = "default_compaction_interval_ms")]
    pub check_interval_ms: u64,

    /// Compact a closed partition once its deleted fraction exceeds this
    /// (default: 0.5).
    #[serde(default = "default_deleted_ratio")]
    pub deleted_ratio: f64,

    /// How long to wait for the rewrite of one partition to drain through
    /// the writer before giving up on this cycle (default: 30s).
    #[serde(default = "default_rewrite_timeout_ms")]
    pub rewrite_timeout_ms: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_compaction_interval_ms(),
            deleted_ratio: default_deleted_ratio(),
            rewrite_timeout_ms: default_rewrite_timeout_ms(),
        }
    }
}

fn default_repair_period_ms() -> u64 {
    60_000
}

fn default_stop_grace_ms() -> u64 {
    2_000
}

fn default_compaction_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_deleted_ratio() -> f64 {
    0.5
}

fn default_rewrite_timeout_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_fills_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"node_id": "a", "storage": {"data_root": "/data"}}"#,
        )
        .unwrap();

        assert_eq!(config.node_id, "a");
        assert_eq!(config.repair_period_ms, 60_000);
        assert_eq!(config.compaction.deleted_ratio, 0.5);
        assert!(config.members.is_empty());
    }

    #[test]
    fn test_members_parse() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "node_id": "b",
                "storage": {"data_root": "/data"},
                "members": [
                    {"id": "a", "master": true},
                    {"id": "b"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.members.len(), 2);
        assert!(config.members[0].master);
        assert!(!config.members[1].master);
    }
}
