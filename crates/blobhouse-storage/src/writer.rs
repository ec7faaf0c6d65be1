//! Disk Writer
//!
//! One writer task per disk, and only that task ever touches the disk's
//! partition files for writing: the single-writer discipline that makes
//! append offsets deterministic and rotation race-free.
//!
//! ## Write Flow
//!
//! ```text
//! take(StorageFile)
//!     ↓
//! master assertion        ← slaves never accept client writes
//!     ↓
//! rotate if it would cross max_partition_size
//!     ↓
//! temp-index row          ← crash bracket opens
//!     ↓
//! append + crc            ← payload bytes hit the partition file
//!     ↓
//! IndexStore::add
//!     ↓
//! temp-index row deleted  ← crash bracket closes
//!     ↓
//! ReplicationSink::replicate
//! ```
//!
//! The loop is absorbing: any failure is logged and the loop moves on to the
//! next item; the failed file is dropped. A disk going unwritable parks the
//! loop until it is restored.
//!
//! Compaction rewrites (`StorageFile::is_compaction`) take a shorter path:
//! copy-append into the active partition and re-point the existing index
//! entry. No temp row, no replication.

use crate::config::StorageConfig;
use crate::disk::DiskService;
use crate::error::{Error, Result};
use crate::file::BlobFile;
use crate::partition::PartitionRegistry;
use crate::queue::WriteQueue;
use crate::storage_file::{ReplicationFile, StorageFile};
use crate::{ReplicationSink, RoleProvider};
use blobhouse_index::{IndexEntry, IndexError, IndexStore, TempIndexEntry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// How long a parked writer sleeps before rechecking its disk.
const PARK_BACKOFF: Duration = Duration::from_secs(1);

pub struct DiskWriter {
    disk: u32,
    config: StorageConfig,
    queue: Arc<WriteQueue>,
    disks: Arc<DiskService>,
    registry: Arc<PartitionRegistry>,
    index: Arc<dyn IndexStore>,
    role: Arc<dyn RoleProvider>,
    replication: Arc<dyn ReplicationSink>,
    current: Option<BlobFile>,
}

impl DiskWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        disk: u32,
        config: StorageConfig,
        queue: Arc<WriteQueue>,
        disks: Arc<DiskService>,
        registry: Arc<PartitionRegistry>,
        index: Arc<dyn IndexStore>,
        role: Arc<dyn RoleProvider>,
        replication: Arc<dyn ReplicationSink>,
    ) -> Self {
        Self {
            disk,
            config,
            queue,
            disks,
            registry,
            index,
            role,
            replication,
            current: None,
        }
    }

    /// The writer loop; runs until the task is cancelled by `stop`.
    pub async fn run(mut self) {
        info!(disk = self.disk, "writer task started");

        loop {
            match self.disks.get(self.disk).await {
                Some(disk) if disk.writable => {}
                _ => {
                    trace!(disk = self.disk, "disk not writable, parking");
                    tokio::time::sleep(PARK_BACKOFF).await;
                    continue;
                }
            }

            let file = self.queue.take().await;
            let started = std::time::Instant::now();

            if let Err(e) = self.write(file).await {
                error!(disk = self.disk, error = %e, "can't write file to the storage");
            }

            trace!(
                disk = self.disk,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "file writing finished"
            );
        }
    }

    async fn write(&mut self, file: StorageFile) -> Result<()> {
        if !self.role.is_master() {
            return Err(Error::NotMaster);
        }

        if file.is_compaction() {
            self.copy_file(file).await
        } else {
            self.add_file(file).await
        }
    }

    /// The client write path: temp bracket, append, index, replicate.
    async fn add_file(&mut self, file: StorageFile) -> Result<()> {
        let data = file.read_data().await?;

        if self.registry.should_rotate(self.disk, data.len() as u64).await? {
            self.rotate().await?;
        }
        let partition = self.registry.get_or_create_active(self.disk).await?;
        self.ensure_blob(partition.id.id).await?;

        let temp = file.path().map(|path| TempIndexEntry {
            id: file.id(),
            entry_type: file.entry_type(),
            path: path.display().to_string(),
            metadata: file.metadata().clone(),
            created_at: now_ms(),
        });
        if let Some(temp) = &temp {
            self.index.add_temp(temp).await?;
        }

        let blob = self.blob()?;
        let (offset, crc) = blob.append(&data).await?;

        let entry = IndexEntry {
            id: file.id(),
            entry_type: file.entry_type(),
            partition: partition.id,
            offset,
            length: data.len() as u64,
            crc,
            metadata: file.metadata().clone(),
            deleted: false,
            created_at: now_ms(),
        };

        if let Err(e) = self.index.add(&entry).await {
            // A duplicate on replay means the original write completed; the
            // temp row must not keep resurrecting it.
            if matches!(e, IndexError::DuplicateEntry { .. }) && temp.is_some() {
                self.index.delete_temp(entry.id, entry.entry_type).await?;
            }
            return Err(e.into());
        }

        if temp.is_some() {
            self.index.delete_temp(entry.id, entry.entry_type).await?;
        }

        self.registry.record_append(self.disk, entry.length).await?;

        debug!(
            disk = self.disk,
            id = entry.id,
            entry_type = entry.entry_type,
            partition = partition.id.id,
            offset,
            length = entry.length,
            "file written"
        );

        self.replication
            .replicate(ReplicationFile { entry, data })
            .await;

        Ok(())
    }

    /// The compaction path: copy-append and re-point the existing entry.
    async fn copy_file(&mut self, file: StorageFile) -> Result<()> {
        let data = file.read_data().await?;

        if self.registry.should_rotate(self.disk, data.len() as u64).await? {
            self.rotate().await?;
        }
        let partition = self.registry.get_or_create_active(self.disk).await?;
        self.ensure_blob(partition.id.id).await?;

        let blob = self.blob()?;
        let (offset, _) = blob.append(&data).await?;

        self.index
            .move_entry(file.id(), file.entry_type(), partition.id, offset)
            .await?;
        self.registry.record_append(self.disk, data.len() as u64).await?;

        debug!(
            disk = self.disk,
            id = file.id(),
            entry_type = file.entry_type(),
            partition = partition.id.id,
            offset,
            "compacted file copied"
        );

        Ok(())
    }

    async fn rotate(&mut self) -> Result<()> {
        if let Some(blob) = &self.current {
            blob.sync().await?;
        }
        self.current = None;
        self.registry.rotate(self.disk).await?;
        Ok(())
    }

    async fn ensure_blob(&mut self, partition: u32) -> Result<()> {
        let stale = match &self.current {
            Some(blob) => blob.partition() != partition,
            None => true,
        };
        if stale {
            self.current = Some(
                BlobFile::open(
                    &self.config.data_root,
                    self.disk,
                    partition,
                    self.config.sync_policy,
                )
                .await?,
            );
        }
        Ok(())
    }

    fn blob(&self) -> Result<&BlobFile> {
        match &self.current {
            Some(blob) => Ok(blob),
            None => unreachable!("blob handle opened by ensure_blob"),
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncPolicy;
    use crate::file;
    use async_trait::async_trait;
    use blobhouse_index::{PartitionId, PartitionStore, SqliteIndexStore};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    struct FakeRole(AtomicBool);

    impl RoleProvider for FakeRole {
        fn is_master(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        files: Mutex<Vec<ReplicationFile>>,
    }

    #[async_trait]
    impl ReplicationSink for CollectingSink {
        async fn replicate(&self, file: ReplicationFile) {
            self.files.lock().await.push(file);
        }
    }

    struct Fixture {
        _dir: TempDir,
        root: std::path::PathBuf,
        store: Arc<SqliteIndexStore>,
        registry: Arc<PartitionRegistry>,
        queue: Arc<WriteQueue>,
        sink: Arc<CollectingSink>,
        writer_task: tokio::task::JoinHandle<()>,
    }

    async fn setup(max_partition_size: u64, master: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        tokio::fs::create_dir_all(root.join("0")).await.unwrap();

        let config = StorageConfig {
            data_root: root.clone(),
            max_partition_size,
            merkle_max_level: 5,
            sync_policy: SyncPolicy::Always,
            ..Default::default()
        };

        let store = Arc::new(SqliteIndexStore::open_in_memory().await.unwrap());
        let disks = Arc::new(DiskService::new(root.clone()));
        disks.refresh().await.unwrap();

        let registry = Arc::new(PartitionRegistry::new(
            store.clone(),
            store.clone(),
            config.clone(),
        ));
        let queue = Arc::new(WriteQueue::new(64));
        let sink = Arc::new(CollectingSink::default());

        let writer = DiskWriter::new(
            0,
            config,
            queue.clone(),
            disks,
            registry.clone(),
            store.clone(),
            Arc::new(FakeRole(AtomicBool::new(master))),
            sink.clone(),
        );
        let writer_task = tokio::spawn(writer.run());

        Fixture {
            _dir: dir,
            root,
            store,
            registry,
            queue,
            sink,
            writer_task,
        }
    }

    fn blob(id: i64, payload: &str) -> StorageFile {
        StorageFile::builder()
            .id(id)
            .entry_type(0)
            .data(Bytes::from(payload.to_string()))
            .build()
            .unwrap()
    }

    async fn wait_for_entries(store: &SqliteIndexStore, partition: PartitionId, count: usize) {
        for _ in 0..200 {
            if store.list_by_partition(partition).await.unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("never saw {} entries in {}", count, partition);
    }

    #[tokio::test]
    async fn test_appends_preserve_queue_order() {
        let fixture = setup(1 << 20, true).await;

        for (id, payload) in [(1, "aaa"), (2, "bbbb"), (3, "cc")] {
            fixture.queue.push(blob(id, payload)).await;
        }
        wait_for_entries(&fixture.store, PartitionId::new(0, 0), 3).await;

        let entries = fixture
            .store
            .list_by_partition(PartitionId::new(0, 0))
            .await
            .unwrap();
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, 3);
        assert_eq!(entries[2].offset, 7);

        // The payloads really are where the index says they are.
        let read = file::read_range(&fixture.root, 0, 0, entries[1].offset, entries[1].length)
            .await
            .unwrap();
        assert_eq!(read, Bytes::from("bbbb"));

        fixture.writer_task.abort();
    }

    #[tokio::test]
    async fn test_every_write_is_replicated() {
        let fixture = setup(1 << 20, true).await;

        fixture.queue.push(blob(1, "payload")).await;
        wait_for_entries(&fixture.store, PartitionId::new(0, 0), 1).await;

        let replicated = fixture.sink.files.lock().await;
        assert_eq!(replicated.len(), 1);
        assert_eq!(replicated[0].entry.id, 1);
        assert_eq!(replicated[0].data, Bytes::from("payload"));

        fixture.writer_task.abort();
    }

    #[tokio::test]
    async fn test_rotation_before_crossing_max_size() {
        let fixture = setup(1024, true).await;

        // 400 + 400 fit; the next 230 would cross 1024 and must rotate.
        fixture.queue.push(blob(1, &"a".repeat(400))).await;
        fixture.queue.push(blob(2, &"b".repeat(400))).await;
        fixture.queue.push(blob(3, &"c".repeat(230))).await;

        wait_for_entries(&fixture.store, PartitionId::new(0, 1), 1).await;

        let first = fixture
            .store
            .list_by_partition(PartitionId::new(0, 0))
            .await
            .unwrap();
        let total: u64 = first.iter().map(|e| e.length).sum();
        assert_eq!(first.len(), 2);
        assert!(total <= 1024);

        let second = fixture
            .store
            .list_by_partition(PartitionId::new(0, 1))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, 3);
        assert_eq!(second[0].offset, 0);

        // Rotation froze the first partition and cached its tree.
        let frozen = fixture
            .store
            .partition(PartitionId::new(0, 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frozen.state, blobhouse_index::PartitionState::Closed);
        assert!(frozen.tree.is_some());

        fixture.writer_task.abort();
    }

    #[tokio::test]
    async fn test_slave_discards_client_writes() {
        let fixture = setup(1 << 20, false).await;

        fixture.queue.push(blob(1, "payload")).await;

        // Give the writer time to take and reject the file.
        for _ in 0..50 {
            if fixture.queue.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(fixture.store.get_by_id(1, 0).await.unwrap().is_none());
        assert!(fixture.sink.files.lock().await.is_empty());

        fixture.writer_task.abort();
    }

    #[tokio::test]
    async fn test_compaction_copy_moves_entry_without_replication() {
        let fixture = setup(1 << 20, true).await;

        fixture.queue.push(blob(1, "payload")).await;
        wait_for_entries(&fixture.store, PartitionId::new(0, 0), 1).await;

        // Simulate the compaction service re-pointing the entry at a fresh
        // partition: close the current one and resubmit as compaction.
        fixture
            .store
            .set_state(PartitionId::new(0, 0), blobhouse_index::PartitionState::Compacting)
            .await
            .unwrap();
        fixture.registry.invalidate(0).await;

        let copy = StorageFile::builder()
            .id(1)
            .entry_type(0)
            .data(Bytes::from("payload"))
            .compaction(true)
            .build()
            .unwrap();
        fixture.queue.push(copy).await;

        wait_for_entries(&fixture.store, PartitionId::new(0, 1), 1).await;

        let moved = fixture.store.get_by_id(1, 0).await.unwrap().unwrap();
        assert_eq!(moved.partition, PartitionId::new(0, 1));
        assert_eq!(moved.offset, 0);

        // Only the original client write was replicated.
        assert_eq!(fixture.sink.files.lock().await.len(), 1);

        fixture.writer_task.abort();
    }

    #[tokio::test]
    async fn test_temp_row_removed_after_staged_write() {
        let fixture = setup(1 << 20, true).await;

        let staged = fixture.root.join("staged-upload");
        tokio::fs::write(&staged, b"staged payload").await.unwrap();

        let file = StorageFile::builder()
            .id(9)
            .entry_type(1)
            .path(staged, 14)
            .build()
            .unwrap();
        fixture.queue.push(file).await;

        wait_for_entries(&fixture.store, PartitionId::new(0, 0), 1).await;

        assert!(fixture.store.temp_index_list(10).await.unwrap().is_empty());
        let entry = fixture.store.get_by_id(9, 1).await.unwrap().unwrap();
        assert_eq!(entry.length, 14);

        fixture.writer_task.abort();
    }
}
