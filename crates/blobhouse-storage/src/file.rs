//! Partition Blob Files
//!
//! A partition is a single append-only file of raw payload bytes at
//! `<data-root>/<disk>/<partition>.blob`. Offsets and lengths live in the
//! index, never in the file, so the file format is the payloads and nothing
//! else.
//!
//! The disk writer owns one open handle per active partition and appends
//! through it; the replication writer uses positional writes because
//! replicated files can arrive out of order and must land at the offset the
//! master assigned. Readers (serving, repair senders) open their own
//! read-only handles via [`read_range`].

use crate::config::SyncPolicy;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

const BLOB_EXTENSION: &str = "blob";

pub fn disk_root(root: &Path, disk: u32) -> PathBuf {
    root.join(disk.to_string())
}

pub fn blob_path(root: &Path, disk: u32, partition: u32) -> PathBuf {
    disk_root(root, disk).join(format!("{}.{}", partition, BLOB_EXTENSION))
}

/// An open partition file plus its running size.
pub struct BlobFile {
    disk: u32,
    partition: u32,
    path: PathBuf,
    policy: SyncPolicy,
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    size: u64,
    last_sync: Instant,
}

impl BlobFile {
    /// Open (or create) the partition file for writing.
    pub async fn open(root: &Path, disk: u32, partition: u32, policy: SyncPolicy) -> Result<Self> {
        let path = blob_path(root, disk, partition);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .await?;
        let size = file.metadata().await?.len();

        debug!(disk, partition, size, path = ?path, "partition file opened");

        Ok(Self {
            disk,
            partition,
            path,
            policy,
            inner: Mutex::new(Inner {
                file,
                size,
                last_sync: Instant::now(),
            }),
        })
    }

    pub fn disk(&self) -> u32 {
        self.disk
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append at the end of the file. Returns the starting offset and the
    /// payload's crc32, computed while writing.
    pub async fn append(&self, data: &[u8]) -> Result<(u64, u64)> {
        let mut inner = self.inner.lock().await;
        let offset = inner.size;

        inner.file.seek(std::io::SeekFrom::Start(offset)).await?;
        inner.file.write_all(data).await?;
        inner.size += data.len() as u64;

        Self::maybe_sync(&mut inner, self.policy).await?;

        Ok((offset, crc32(data)))
    }

    /// Write at a fixed offset, extending the file when the write lands past
    /// the current end. Used when applying replicated files, whose offsets
    /// were assigned by the master.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<u64> {
        let mut inner = self.inner.lock().await;

        inner.file.seek(std::io::SeekFrom::Start(offset)).await?;
        inner.file.write_all(data).await?;
        inner.size = inner.size.max(offset + data.len() as u64);

        Self::maybe_sync(&mut inner, self.policy).await?;

        Ok(crc32(data))
    }

    pub async fn size(&self) -> u64 {
        self.inner.lock().await.size
    }

    pub async fn sync(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        inner.file.sync_all().await?;
        Ok(())
    }

    async fn maybe_sync(inner: &mut Inner, policy: SyncPolicy) -> Result<()> {
        let due = match policy {
            SyncPolicy::Always => true,
            SyncPolicy::Never => false,
            SyncPolicy::Interval { interval_ms } => {
                inner.last_sync.elapsed().as_millis() as u64 >= interval_ms
            }
        };

        if due {
            inner.file.sync_all().await?;
            inner.last_sync = Instant::now();
        }
        Ok(())
    }
}

fn crc32(data: &[u8]) -> u64 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize() as u64
}

/// Read `length` payload bytes at `offset` through an independent read-only
/// handle.
pub async fn read_range(
    root: &Path,
    disk: u32,
    partition: u32,
    offset: u64,
    length: u64,
) -> Result<Bytes> {
    let path = blob_path(root, disk, partition);
    let mut file = File::open(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::PartitionNotFound { disk, partition }
        } else {
            Error::Io(e)
        }
    })?;

    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf).await?;

    Ok(Bytes::from(buf))
}

/// Partition ids discovered from the blob files present on a disk, sorted.
pub async fn list_partition_files(root: &Path, disk: u32) -> Result<Vec<u32>> {
    let dir = disk_root(root, disk);
    let mut partitions = Vec::new();

    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(partitions),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(stem) = name.strip_suffix(&format!(".{}", BLOB_EXTENSION)) {
            if let Ok(partition) = stem.parse::<u32>() {
                partitions.push(partition);
            }
        }
    }

    partitions.sort_unstable();
    Ok(partitions)
}

/// Disk ids discovered from the numbered subdirectories of the data root.
pub async fn list_disks(root: &Path) -> Result<Vec<u32>> {
    let mut disks = Vec::new();

    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(disks),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(disk) = name.parse::<u32>() {
                disks.push(disk);
            }
        }
    }

    disks.sort_unstable();
    Ok(disks)
}

/// Size of the partition file on disk, or `None` if it does not exist yet.
pub async fn file_size(root: &Path, disk: u32, partition: u32) -> Result<Option<u64>> {
    match tokio::fs::metadata(blob_path(root, disk, partition)).await {
        Ok(metadata) => Ok(Some(metadata.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Remove a partition file; used after compaction supersedes it.
pub async fn delete_blob(root: &Path, disk: u32, partition: u32) -> Result<()> {
    let path = blob_path(root, disk, partition);
    tokio::fs::remove_file(&path).await?;
    info!(disk, partition, path = ?path, "partition file deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_returns_sequential_offsets() {
        let dir = TempDir::new().unwrap();
        let blob = BlobFile::open(dir.path(), 0, 0, SyncPolicy::Always)
            .await
            .unwrap();

        let (off1, _) = blob.append(b"hello").await.unwrap();
        let (off2, _) = blob.append(b"world!").await.unwrap();

        assert_eq!(off1, 0);
        assert_eq!(off2, 5);
        assert_eq!(blob.size().await, 11);
    }

    #[tokio::test]
    async fn test_append_then_read_range() {
        let dir = TempDir::new().unwrap();
        let blob = BlobFile::open(dir.path(), 0, 0, SyncPolicy::Always)
            .await
            .unwrap();

        blob.append(b"hello").await.unwrap();
        let (offset, _) = blob.append(b"world").await.unwrap();

        let read = read_range(dir.path(), 0, 0, offset, 5).await.unwrap();
        assert_eq!(read, Bytes::from("world"));
    }

    #[tokio::test]
    async fn test_crc_matches_across_append_and_write_at() {
        let dir = TempDir::new().unwrap();
        let blob = BlobFile::open(dir.path(), 0, 0, SyncPolicy::Always)
            .await
            .unwrap();

        let (_, crc_append) = blob.append(b"payload").await.unwrap();
        let crc_positional = blob.write_at(100, b"payload").await.unwrap();

        assert_eq!(crc_append, crc_positional);
        assert_ne!(crc_append, 0);
    }

    #[tokio::test]
    async fn test_write_at_extends_size() {
        let dir = TempDir::new().unwrap();
        let blob = BlobFile::open(dir.path(), 0, 0, SyncPolicy::Always)
            .await
            .unwrap();

        blob.write_at(100, b"tail").await.unwrap();
        assert_eq!(blob.size().await, 104);

        // Out-of-order arrival: earlier offset does not shrink the file.
        blob.write_at(0, b"head").await.unwrap();
        assert_eq!(blob.size().await, 104);

        let read = read_range(dir.path(), 0, 0, 100, 4).await.unwrap();
        assert_eq!(read, Bytes::from("tail"));
    }

    #[tokio::test]
    async fn test_reopen_recovers_size() {
        let dir = TempDir::new().unwrap();
        {
            let blob = BlobFile::open(dir.path(), 0, 0, SyncPolicy::Always)
                .await
                .unwrap();
            blob.append(b"0123456789").await.unwrap();
        }

        let blob = BlobFile::open(dir.path(), 0, 0, SyncPolicy::Always)
            .await
            .unwrap();
        assert_eq!(blob.size().await, 10);
    }

    #[tokio::test]
    async fn test_list_partition_files() {
        let dir = TempDir::new().unwrap();
        for partition in [2u32, 0, 1] {
            BlobFile::open(dir.path(), 0, partition, SyncPolicy::Never)
                .await
                .unwrap();
        }
        tokio::fs::write(dir.path().join("0").join("junk.txt"), b"x")
            .await
            .unwrap();

        let partitions = list_partition_files(dir.path(), 0).await.unwrap();
        assert_eq!(partitions, vec![0, 1, 2]);

        assert!(list_partition_files(dir.path(), 9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_disks() {
        let dir = TempDir::new().unwrap();
        for disk in [1u32, 0] {
            tokio::fs::create_dir_all(disk_root(dir.path(), disk))
                .await
                .unwrap();
        }
        tokio::fs::create_dir_all(dir.path().join("not-a-disk"))
            .await
            .unwrap();

        assert_eq!(list_disks(dir.path()).await.unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_delete_blob() {
        let dir = TempDir::new().unwrap();
        BlobFile::open(dir.path(), 0, 0, SyncPolicy::Never)
            .await
            .unwrap();

        delete_blob(dir.path(), 0, 0).await.unwrap();
        assert_eq!(file_size(dir.path(), 0, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_range_missing_partition() {
        let dir = TempDir::new().unwrap();
        let result = read_range(dir.path(), 0, 7, 0, 4).await;
        assert!(matches!(
            result,
            Err(Error::PartitionNotFound { disk: 0, partition: 7 })
        ));
    }
}
