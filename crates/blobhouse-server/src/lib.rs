//! Blobhouse Server
//!
//! Assembles a node out of the other crates' capabilities and owns its
//! lifecycle:
//!
//! - `start`: discover disks (at least one required), spawn one disk
//!   writer per disk and the node's replication writer, start the repair
//!   ticker, start compaction when master, and replay the temp index.
//! - `stop`: drain the write queues, then the replication queue (polled at
//!   500 ms), wait a grace period, then cancel the background tasks.
//! - `refresh`: rediscover disks; new ones get a writer and an immediate
//!   repair pass.
//!
//! The ingest surface is deliberately small: `submit` enqueues a
//! `StorageFile` (blocking when the disk's queue is full; that is the
//! backpressure the front end sees), `read_blob` serves payloads through an
//! independent read handle, and `delete_blob` tombstones every type stored
//! under an id.

pub mod compaction;
pub mod config;
pub mod error;

pub use compaction::{CompactionService, WriteQueues};
pub use config::{CompactionConfig, MemberConfig, ServerConfig};
pub use error::{Result, ServerError};

use blobhouse_cluster::{
    ClusterHandler, ClusterMembership, ClusterTransport, MembershipRole, RepairEngine,
    ReplicationClient,
};
use blobhouse_core::IdGenerator;
use blobhouse_index::{
    IndexEntry, IndexStore, Partition, PartitionId, PartitionState, PartitionStore, SqliteIndexStore,
    TempIndexEntry,
};
use blobhouse_storage::{
    file, DiskService, DiskWriter, PartitionRegistry, ReplicationQueue, ReplicationSink,
    ReplicationWriter, StorageFile, WriteQueue,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Poll interval for the queue drains during `stop`.
const DRAIN_POLL: Duration = Duration::from_millis(500);

/// How many temp-index rows one restore pass replays.
const RESTORE_BATCH: u32 = 1024;

pub struct BlobServer {
    config: ServerConfig,
    store: Arc<SqliteIndexStore>,
    membership: Arc<dyn ClusterMembership>,
    disks: Arc<DiskService>,
    registry: Arc<PartitionRegistry>,
    write_queues: WriteQueues,
    replication_queue: Arc<ReplicationQueue>,
    handler: Arc<ClusterHandler>,
    repair: Arc<RepairEngine>,
    compaction: Arc<CompactionService>,
    sink: Arc<dyn ReplicationSink>,
    ids: IdGenerator,
    tasks: Mutex<Tasks>,
    next_disk: AtomicUsize,
}

#[derive(Default)]
struct Tasks {
    disk_writers: HashMap<u32, JoinHandle<()>>,
    replication_writer: Option<JoinHandle<()>>,
    repair: Option<(JoinHandle<()>, oneshot::Sender<()>)>,
    compaction: Option<(JoinHandle<()>, oneshot::Sender<()>)>,
}

impl BlobServer {
    /// Assemble a node. The transport is handed in (it is an external
    /// capability); the node's handler is registered with it by the caller.
    pub async fn open(
        config: ServerConfig,
        membership: Arc<dyn ClusterMembership>,
        transport: Arc<dyn ClusterTransport>,
    ) -> Result<Self> {
        let store = match &config.index_db {
            Some(path) => Arc::new(SqliteIndexStore::open(path).await?),
            None => Arc::new(SqliteIndexStore::open_in_memory().await?),
        };

        let disks = Arc::new(DiskService::new(config.storage.data_root.clone()));
        let registry = Arc::new(PartitionRegistry::new(
            store.clone(),
            store.clone(),
            config.storage.clone(),
        ));
        let write_queues: WriteQueues = Arc::new(RwLock::new(HashMap::new()));
        let replication_queue = Arc::new(ReplicationQueue::new(
            config.storage.replication_queue_capacity,
        ));

        let handler = Arc::new(ClusterHandler::new(
            config.storage.clone(),
            membership.clone(),
            store.clone(),
            replication_queue.clone(),
        ));
        handler.set_transport(transport.clone());

        let sink: Arc<dyn ReplicationSink> =
            Arc::new(ReplicationClient::new(membership.clone(), transport.clone()));

        let repair = Arc::new(RepairEngine::new(
            config.storage.clone(),
            membership.clone(),
            transport,
            store.clone(),
            store.clone(),
            disks.clone(),
            replication_queue.clone(),
        ));

        let compaction = Arc::new(CompactionService::new(
            config.compaction.clone(),
            config.storage.clone(),
            store.clone(),
            store.clone(),
            disks.clone(),
            write_queues.clone(),
        ));

        let ids = IdGenerator::new(node_ordinal(&config.node_id));

        Ok(Self {
            config,
            store,
            membership,
            disks,
            registry,
            write_queues,
            replication_queue,
            handler,
            repair,
            compaction,
            sink,
            ids,
            tasks: Mutex::new(Tasks::default()),
            next_disk: AtomicUsize::new(0),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn handler(&self) -> Arc<ClusterHandler> {
        self.handler.clone()
    }

    pub fn index(&self) -> Arc<SqliteIndexStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<PartitionRegistry> {
        self.registry.clone()
    }

    /// Allocate an id for a new blob.
    pub fn next_id(&self) -> i64 {
        self.ids.generate()
    }

    /// Bring the node up. Fatal if the data root holds no disks.
    pub async fn start(&self) -> Result<()> {
        self.disks.refresh().await?;
        let disks = self.disks.disks().await;
        if disks.is_empty() {
            return Err(ServerError::NoDisks);
        }
        if disks.len() + 1 > self.config.storage.writer_pool_size {
            warn!(
                disks = disks.len(),
                pool = self.config.storage.writer_pool_size,
                "more writer tasks than the configured pool size, tasks will contend"
            );
        }

        for disk in &disks {
            self.reconcile_partitions(*disk).await?;
            self.add_disk_writer(*disk).await;
        }
        self.add_replication_writer().await;

        if self.membership.is_master() {
            let (tx, rx) = oneshot::channel();
            let handle = self.compaction.clone().start(rx);
            self.tasks.lock().await.compaction = Some((handle, tx));
        }

        {
            let (tx, rx) = oneshot::channel();
            let handle = self
                .repair
                .clone()
                .start(Duration::from_millis(self.config.repair_period_ms), rx);
            self.tasks.lock().await.repair = Some((handle, tx));
        }

        self.restore().await;

        info!(node = %self.config.node_id, "server started");
        Ok(())
    }

    /// Drain, grace, cancel.
    pub async fn stop(&self) {
        // Wait for the write queues to drain.
        loop {
            let queues = self.write_queues.read().await;
            let mut empty = true;
            for queue in queues.values() {
                if !queue.is_empty().await {
                    empty = false;
                    break;
                }
            }
            drop(queues);
            if empty {
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        // Then the replication queue.
        while !self.replication_queue.is_empty().await {
            tokio::time::sleep(DRAIN_POLL).await;
        }

        // Let in-flight writes settle before cancelling the loops.
        tokio::time::sleep(Duration::from_millis(self.config.stop_grace_ms)).await;

        let mut tasks = self.tasks.lock().await;
        if let Some((handle, tx)) = tasks.compaction.take() {
            let _ = tx.send(());
            let _ = handle.await;
        }
        if let Some((handle, tx)) = tasks.repair.take() {
            let _ = tx.send(());
            let _ = handle.await;
        }
        for (_, handle) in tasks.disk_writers.drain() {
            handle.abort();
        }
        if let Some(handle) = tasks.replication_writer.take() {
            handle.abort();
        }

        info!(node = %self.config.node_id, "server stopped");
    }

    /// Rediscover disks; new ones get a writer and an immediate repair pass.
    pub async fn refresh(&self) -> Result<()> {
        let added = self.disks.refresh().await?;

        for disk in added {
            self.add_disk_writer(disk).await;

            let repair = self.repair.clone();
            tokio::spawn(async move {
                if let Err(e) = repair.repair_disk(disk).await {
                    warn!(disk, error = %e, "repair after disk addition failed");
                }
            });
        }
        Ok(())
    }

    /// Replay writes interrupted by a crash: every surviving temp-index row
    /// is resubmitted from its staged file.
    pub async fn restore(&self) {
        info!("restore of interrupted writes started");

        let rows = match self.store.temp_index_list(RESTORE_BATCH).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "can't read temp index");
                return;
            }
        };

        let count = rows.len();
        for row in rows {
            if let Err(e) = self.restore_file(&row).await {
                error!(id = row.id, entry_type = row.entry_type, error = %e, "can't restore file");
            }
        }

        info!(files = count, "restore of interrupted writes finished");
    }

    async fn restore_file(&self, row: &TempIndexEntry) -> Result<()> {
        let path = PathBuf::from(&row.path);
        let length = tokio::fs::metadata(&path).await?.len();

        let file = StorageFile::builder()
            .id(row.id)
            .entry_type(row.entry_type)
            .path(path, length)
            .metadata(row.metadata.clone())
            .build()?;

        self.submit(file).await
    }

    /// Enqueue a blob for writing. Blocks while the chosen disk's queue is
    /// full; this is the backpressure the ingest layer sees.
    pub async fn submit(&self, file: StorageFile) -> Result<()> {
        let queues = self.write_queues.read().await;
        let mut disks: Vec<u32> = queues.keys().copied().collect();
        if disks.is_empty() {
            return Err(ServerError::NoDisks);
        }
        disks.sort_unstable();

        let pick = disks[self.next_disk.fetch_add(1, Ordering::Relaxed) % disks.len()];
        let queue = queues.get(&pick).cloned();
        drop(queues);

        if let Some(queue) = queue {
            queue.push(file).await;
        }
        Ok(())
    }

    /// Serve a blob's entry and payload; `None` when absent or deleted.
    pub async fn read_blob(&self, id: i64, entry_type: i32) -> Result<Option<(IndexEntry, Bytes)>> {
        let Some(entry) = self.store.get_by_id(id, entry_type).await? else {
            return Ok(None);
        };
        if entry.deleted {
            return Ok(None);
        }

        let data = file::read_range(
            &self.config.storage.data_root,
            entry.partition.disk,
            entry.partition.id,
            entry.offset,
            entry.length,
        )
        .await?;
        Ok(Some((entry, data)))
    }

    /// Tombstone every type stored under `id`; payloads are reclaimed by
    /// compaction. Returns how many entries were touched.
    pub async fn delete_blob(&self, id: i64) -> Result<usize> {
        let entries = self.store.list_by_id(id).await?;
        for entry in &entries {
            self.store.delete(entry.id, entry.entry_type).await?;
        }
        Ok(entries.len())
    }

    /// Run one compaction cycle now (master only does this on a schedule).
    pub async fn compact_now(&self) {
        self.compaction.run_cycle().await;
    }

    /// Run one repair cycle now.
    pub async fn repair_now(&self) {
        self.repair.repair().await;
    }

    /// Reconcile partition rows with the blob files actually on the disk:
    /// a file without a row (index lost its tail in a crash) gets a closed
    /// row sized from the file, so repair can re-derive its contents.
    async fn reconcile_partitions(&self, disk: u32) -> Result<()> {
        let known: std::collections::HashSet<u32> = self
            .store
            .partitions(disk)
            .await?
            .into_iter()
            .map(|p| p.id.id)
            .collect();

        for partition in file::list_partition_files(&self.config.storage.data_root, disk).await? {
            if known.contains(&partition) {
                continue;
            }
            warn!(disk, partition, "blob file without partition row, re-registering");

            let mut row = Partition::new(PartitionId::new(disk, partition));
            row.state = PartitionState::Closed;
            row.size = file::file_size(&self.config.storage.data_root, disk, partition)
                .await?
                .unwrap_or(0);
            self.store.add_partition(&row).await?;
        }
        Ok(())
    }

    async fn add_disk_writer(&self, disk: u32) {
        let queue = Arc::new(WriteQueue::new(self.config.storage.write_queue_capacity));
        self.write_queues.write().await.insert(disk, queue.clone());

        let writer = DiskWriter::new(
            disk,
            self.config.storage.clone(),
            queue,
            self.disks.clone(),
            self.registry.clone(),
            self.store.clone(),
            Arc::new(MembershipRole(self.membership.clone())),
            self.sink.clone(),
        );

        let delay = Duration::from_millis(self.config.storage.writer_task_start_delay_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            writer.run().await;
        });

        self.tasks.lock().await.disk_writers.insert(disk, handle);
    }

    async fn add_replication_writer(&self) {
        let writer = ReplicationWriter::new(
            self.config.storage.clone(),
            self.replication_queue.clone(),
            self.store.clone(),
            self.store.clone(),
        );

        let delay = Duration::from_millis(self.config.storage.writer_task_start_delay_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            writer.run().await;
        });

        self.tasks.lock().await.replication_writer = Some(handle);
    }
}

/// Stable per-node ordinal for id generation, derived from the node id.
fn node_ordinal(node_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    node_id.hash(&mut hasher);
    hasher.finish()
}
