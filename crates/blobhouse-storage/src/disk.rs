//! Disk Registry
//!
//! Tracks the disks available under the data root and whether each one is
//! currently writable. Disks are numbered subdirectories; `refresh` rescans
//! the root so operators can add a disk by creating its directory. A disk is
//! marked unwritable while offline or while compaction owns it, which parks
//! the disk's writer until `refresh` or the owner restores it.

use crate::error::Result;
use crate::file;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disk {
    pub id: u32,
    pub writable: bool,
}

pub struct DiskService {
    root: PathBuf,
    disks: RwLock<HashMap<u32, Disk>>,
}

impl DiskService {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            disks: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Rescan the data root. Newly found disks start writable; known disks
    /// keep their current writability.
    pub async fn refresh(&self) -> Result<Vec<u32>> {
        let found = file::list_disks(&self.root).await?;

        let mut disks = self.disks.write().await;
        let mut added = Vec::new();
        for id in found {
            if !disks.contains_key(&id) {
                disks.insert(id, Disk { id, writable: true });
                added.push(id);
            }
        }

        if !added.is_empty() {
            info!(disks = ?added, "disks discovered");
        }
        Ok(added)
    }

    pub async fn disks(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.disks.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn get(&self, disk: u32) -> Option<Disk> {
        self.disks.read().await.get(&disk).copied()
    }

    pub async fn is_writable(&self, disk: u32) -> bool {
        self.disks
            .read()
            .await
            .get(&disk)
            .map(|d| d.writable)
            .unwrap_or(false)
    }

    pub async fn set_writable(&self, disk: u32, writable: bool) {
        if let Some(d) = self.disks.write().await.get_mut(&disk) {
            if d.writable != writable {
                info!(disk, writable, "disk writability changed");
                d.writable = writable;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_refresh_discovers_numbered_dirs() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("0")).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("2")).await.unwrap();

        let service = DiskService::new(dir.path().to_path_buf());
        let added = service.refresh().await.unwrap();

        assert_eq!(added, vec![0, 2]);
        assert_eq!(service.disks().await, vec![0, 2]);
        assert!(service.is_writable(0).await);
    }

    #[tokio::test]
    async fn test_refresh_keeps_writability_and_reports_only_new() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("0")).await.unwrap();

        let service = DiskService::new(dir.path().to_path_buf());
        service.refresh().await.unwrap();
        service.set_writable(0, false).await;

        tokio::fs::create_dir_all(dir.path().join("1")).await.unwrap();
        let added = service.refresh().await.unwrap();

        assert_eq!(added, vec![1]);
        assert!(!service.is_writable(0).await);
        assert!(service.is_writable(1).await);
    }

    #[tokio::test]
    async fn test_unknown_disk_is_not_writable() {
        let dir = TempDir::new().unwrap();
        let service = DiskService::new(dir.path().to_path_buf());
        assert!(!service.is_writable(9).await);
        assert_eq!(service.get(9).await, None);
    }
}
