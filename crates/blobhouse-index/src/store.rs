//! SQLite Index Store
//!
//! Implements [`IndexStore`] and [`PartitionStore`] on SQLite via sqlx.
//!
//! ## Why SQLite?
//!
//! The index is a per-node concern (each node indexes its own disks), so an
//! embedded database is the right weight: zero configuration, ACID commits
//! for the durability contract of `add`, and in-memory databases that make
//! tests fast and isolated. WAL mode lets the read paths (serving, repair
//! tree builds) run concurrently with the writers.
//!
//! ## Conventions
//!
//! - u64/u32 values cross the boundary as i64 casts; SQLite integers are
//!   signed 64-bit.
//! - The metadata multimap and cached Merkle trees are stored as JSON text
//!   columns.
//! - Uniqueness errors are detected from SQLite's "UNIQUE constraint
//!   failed" and surfaced as [`IndexError::DuplicateEntry`].

use crate::error::{IndexError, Result};
use crate::types::*;
use crate::{IndexStore, PartitionStore};
use async_trait::async_trait;
use blobhouse_core::MerkleTree;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS index_entries (
        id INTEGER NOT NULL,
        entry_type INTEGER NOT NULL,
        disk INTEGER NOT NULL,
        partition_id INTEGER NOT NULL,
        offset INTEGER NOT NULL,
        length INTEGER NOT NULL CHECK (length > 0),
        crc INTEGER NOT NULL,
        metadata TEXT NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (id, entry_type)
    )",
    "CREATE INDEX IF NOT EXISTS idx_entries_by_partition
        ON index_entries (disk, partition_id, id, entry_type)",
    "CREATE TABLE IF NOT EXISTS partitions (
        disk INTEGER NOT NULL,
        partition_id INTEGER NOT NULL,
        state TEXT NOT NULL,
        crc INTEGER NOT NULL DEFAULT 0,
        size INTEGER NOT NULL DEFAULT 0,
        tree TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (disk, partition_id)
    )",
    "CREATE TABLE IF NOT EXISTS temp_index (
        id INTEGER NOT NULL,
        entry_type INTEGER NOT NULL,
        path TEXT NOT NULL,
        metadata TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (id, entry_type)
    )",
];

type EntryRow = (i64, i64, i64, i64, i64, i64, i64, String, i64, i64);
type PartitionRow = (i64, i64, String, i64, i64, Option<String>);

const ENTRY_COLUMNS: &str =
    "id, entry_type, disk, partition_id, offset, length, crc, metadata, deleted, created_at";
const PARTITION_COLUMNS: &str = "disk, partition_id, state, crc, size, tree";

/// SQLite-backed implementation of the index capabilities.
pub struct SqliteIndexStore {
    pool: SqlitePool,
}

impl SqliteIndexStore {
    /// Open (or create) a file-backed index database.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))
                .map_err(IndexError::Database)?
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        Self::init(pool).await
    }

    /// In-memory database for tests. Pinned to a single connection so the
    /// whole pool sees one database and it never gets reaped.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn entry_from_row(row: EntryRow) -> Result<IndexEntry> {
        let (id, entry_type, disk, partition_id, offset, length, crc, metadata, deleted, created_at) =
            row;

        let metadata: Metadata = serde_json::from_str(&metadata)
            .map_err(|e| IndexError::CorruptIndex(format!("metadata for id={}: {}", id, e)))?;

        Ok(IndexEntry {
            id,
            entry_type: entry_type as i32,
            partition: PartitionId::new(disk as u32, partition_id as u32),
            offset: offset as u64,
            length: length as u64,
            crc: crc as u64,
            metadata,
            deleted: deleted != 0,
            created_at,
        })
    }

    fn partition_from_row(row: PartitionRow) -> Result<Partition> {
        let (disk, partition_id, state, crc, size, tree) = row;

        let state = PartitionState::parse(&state)
            .ok_or_else(|| IndexError::CorruptIndex(format!("partition state {:?}", state)))?;
        let tree: Option<MerkleTree> = match tree {
            Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
                IndexError::CorruptIndex(format!(
                    "tree for partition {}/{}: {}",
                    disk, partition_id, e
                ))
            })?),
            None => None,
        };

        Ok(Partition {
            id: PartitionId::new(disk as u32, partition_id as u32),
            state,
            crc: crc as u64,
            size: size as u64,
            tree,
        })
    }

    fn is_unique_violation(error: &sqlx::Error) -> bool {
        error.to_string().contains("UNIQUE constraint failed")
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn add(&self, entry: &IndexEntry) -> Result<()> {
        let metadata = serde_json::to_string(&entry.metadata)?;

        let result = sqlx::query(
            "INSERT INTO index_entries
                (id, entry_type, disk, partition_id, offset, length, crc, metadata, deleted, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id)
        .bind(entry.entry_type as i64)
        .bind(entry.partition.disk as i64)
        .bind(entry.partition.id as i64)
        .bind(entry.offset as i64)
        .bind(entry.length as i64)
        .bind(entry.crc as i64)
        .bind(metadata)
        .bind(entry.deleted as i64)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if Self::is_unique_violation(&e) => Err(IndexError::DuplicateEntry {
                id: entry.id,
                entry_type: entry.entry_type,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_by_id(&self, id: i64, entry_type: i32) -> Result<Option<IndexEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM index_entries WHERE id = ? AND entry_type = ?",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .bind(entry_type as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::entry_from_row).transpose()
    }

    async fn list_by_id(&self, id: i64) -> Result<Vec<IndexEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM index_entries WHERE id = ? ORDER BY entry_type",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::entry_from_row).collect()
    }

    async fn list_by_partition(&self, partition: PartitionId) -> Result<Vec<IndexEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM index_entries
             WHERE disk = ? AND partition_id = ?
             ORDER BY id, entry_type",
            ENTRY_COLUMNS
        ))
        .bind(partition.disk as i64)
        .bind(partition.id as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::entry_from_row).collect()
    }

    async fn live_list_by_partition(&self, partition: PartitionId) -> Result<Vec<IndexEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM index_entries
             WHERE disk = ? AND partition_id = ? AND deleted = 0
             ORDER BY id, entry_type",
            ENTRY_COLUMNS
        ))
        .bind(partition.disk as i64)
        .bind(partition.id as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::entry_from_row).collect()
    }

    async fn min_max_range(&self, partition: PartitionId) -> Result<Option<(i64, i64)>> {
        let row: (Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT MIN(id), MAX(id) FROM index_entries WHERE disk = ? AND partition_id = ?",
        )
        .bind(partition.disk as i64)
        .bind(partition.id as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(match row {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        })
    }

    async fn size_of_deleted(&self, partition: PartitionId) -> Result<u64> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(length), 0) FROM index_entries
             WHERE disk = ? AND partition_id = ? AND deleted = 1",
        )
        .bind(partition.disk as i64)
        .bind(partition.id as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(total as u64)
    }

    async fn delete(&self, id: i64, entry_type: i32) -> Result<()> {
        sqlx::query("UPDATE index_entries SET deleted = 1 WHERE id = ? AND entry_type = ?")
            .bind(id)
            .bind(entry_type as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn restore(&self, id: i64, entry_type: i32) -> Result<()> {
        let rows = sqlx::query("UPDATE index_entries SET deleted = 0 WHERE id = ? AND entry_type = ?")
            .bind(id)
            .bind(entry_type as i64)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(IndexError::EntryNotFound { id, entry_type });
        }
        Ok(())
    }

    async fn move_entry(
        &self,
        id: i64,
        entry_type: i32,
        partition: PartitionId,
        offset: u64,
    ) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE index_entries SET disk = ?, partition_id = ?, offset = ?
             WHERE id = ? AND entry_type = ?",
        )
        .bind(partition.disk as i64)
        .bind(partition.id as i64)
        .bind(offset as i64)
        .bind(id)
        .bind(entry_type as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(IndexError::EntryNotFound { id, entry_type });
        }
        Ok(())
    }

    async fn add_temp(&self, entry: &TempIndexEntry) -> Result<()> {
        let metadata = serde_json::to_string(&entry.metadata)?;

        // REPLACE keeps crash replay idempotent: the replayed write records
        // its temp row again before the original row is removed.
        sqlx::query(
            "INSERT OR REPLACE INTO temp_index (id, entry_type, path, metadata, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.id)
        .bind(entry.entry_type as i64)
        .bind(&entry.path)
        .bind(metadata)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_temp(&self, id: i64, entry_type: i32) -> Result<()> {
        sqlx::query("DELETE FROM temp_index WHERE id = ? AND entry_type = ?")
            .bind(id)
            .bind(entry_type as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn temp_index_list(&self, limit: u32) -> Result<Vec<TempIndexEntry>> {
        let rows: Vec<(i64, i64, String, String, i64)> = sqlx::query_as(
            "SELECT id, entry_type, path, metadata, created_at
             FROM temp_index ORDER BY created_at LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, entry_type, path, metadata, created_at)| {
                let metadata: Metadata = serde_json::from_str(&metadata).map_err(|e| {
                    IndexError::CorruptIndex(format!("temp metadata for id={}: {}", id, e))
                })?;
                Ok(TempIndexEntry {
                    id,
                    entry_type: entry_type as i32,
                    path,
                    metadata,
                    created_at,
                })
            })
            .collect()
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM index_entries").execute(&self.pool).await?;
        sqlx::query("DELETE FROM partitions").execute(&self.pool).await?;
        sqlx::query("DELETE FROM temp_index").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PartitionStore for SqliteIndexStore {
    async fn add_partition(&self, partition: &Partition) -> Result<()> {
        let tree = partition
            .tree
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Self::now_ms();

        // Idempotent: the replication writer re-creates partitions it first
        // sees in an inbound file.
        sqlx::query(
            "INSERT OR IGNORE INTO partitions
                (disk, partition_id, state, crc, size, tree, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(partition.id.disk as i64)
        .bind(partition.id.id as i64)
        .bind(partition.state.as_str())
        .bind(partition.crc as i64)
        .bind(partition.size as i64)
        .bind(tree)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn partitions(&self, disk: u32) -> Result<Vec<Partition>> {
        let rows: Vec<PartitionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM partitions WHERE disk = ? ORDER BY partition_id",
            PARTITION_COLUMNS
        ))
        .bind(disk as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::partition_from_row).collect()
    }

    async fn partition(&self, id: PartitionId) -> Result<Option<Partition>> {
        let row: Option<PartitionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM partitions WHERE disk = ? AND partition_id = ?",
            PARTITION_COLUMNS
        ))
        .bind(id.disk as i64)
        .bind(id.id as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::partition_from_row).transpose()
    }

    async fn update_tree(&self, id: PartitionId, tree: &MerkleTree) -> Result<()> {
        let json = serde_json::to_string(tree)?;

        let rows = sqlx::query(
            "UPDATE partitions SET tree = ?, updated_at = ? WHERE disk = ? AND partition_id = ?",
        )
        .bind(json)
        .bind(Self::now_ms())
        .bind(id.disk as i64)
        .bind(id.id as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(IndexError::PartitionNotFound {
                disk: id.disk,
                partition: id.id,
            });
        }
        Ok(())
    }

    async fn update_partition(&self, partition: &Partition) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE partitions SET state = ?, crc = ?, size = ?, updated_at = ?
             WHERE disk = ? AND partition_id = ?",
        )
        .bind(partition.state.as_str())
        .bind(partition.crc as i64)
        .bind(partition.size as i64)
        .bind(Self::now_ms())
        .bind(partition.id.disk as i64)
        .bind(partition.id.id as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(IndexError::PartitionNotFound {
                disk: partition.id.disk,
                partition: partition.id.id,
            });
        }
        Ok(())
    }

    async fn set_state(&self, id: PartitionId, state: PartitionState) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE partitions SET state = ?, updated_at = ? WHERE disk = ? AND partition_id = ?",
        )
        .bind(state.as_str())
        .bind(Self::now_ms())
        .bind(id.disk as i64)
        .bind(id.id as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(IndexError::PartitionNotFound {
                disk: id.disk,
                partition: id.id,
            });
        }
        Ok(())
    }

    async fn delete_partition(&self, id: PartitionId) -> Result<()> {
        sqlx::query("DELETE FROM partitions WHERE disk = ? AND partition_id = ?")
            .bind(id.disk as i64)
            .bind(id.id as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobhouse_core::OffsetRange;

    async fn setup() -> SqliteIndexStore {
        SqliteIndexStore::open_in_memory().await.unwrap()
    }

    fn entry(id: i64, entry_type: i32, partition: PartitionId, offset: u64) -> IndexEntry {
        let mut metadata = Metadata::new();
        metadata.insert("content-type".to_string(), vec!["image/png".to_string()]);

        IndexEntry {
            id,
            entry_type,
            partition,
            offset,
            length: 128,
            crc: 42,
            metadata,
            deleted: false,
            created_at: 1_700_000_000_000,
        }
    }

    // ---------------------------------------------------------------
    // Index entries
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_add_and_get_roundtrip() {
        let store = setup().await;
        let expected = entry(1, 0, PartitionId::new(0, 0), 0);

        store.add(&expected).await.unwrap();

        let got = store.get_by_id(1, 0).await.unwrap().unwrap();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = setup().await;
        assert!(store.get_by_id(99, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_add_fails() {
        let store = setup().await;
        let e = entry(1, 0, PartitionId::new(0, 0), 0);

        store.add(&e).await.unwrap();

        let result = store.add(&e).await;
        assert!(matches!(
            result,
            Err(IndexError::DuplicateEntry { id: 1, entry_type: 0 })
        ));
    }

    #[tokio::test]
    async fn test_same_id_different_type_allowed() {
        let store = setup().await;
        let partition = PartitionId::new(0, 0);

        store.add(&entry(1, 0, partition, 0)).await.unwrap();
        store.add(&entry(1, 1, partition, 128)).await.unwrap();

        let all = store.list_by_id(1).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].entry_type, 0);
        assert_eq!(all[1].entry_type, 1);
    }

    #[tokio::test]
    async fn test_list_by_partition_sorted_by_id_then_type() {
        let store = setup().await;
        let partition = PartitionId::new(0, 0);

        store.add(&entry(2, 0, partition, 0)).await.unwrap();
        store.add(&entry(1, 1, partition, 128)).await.unwrap();
        store.add(&entry(1, 0, partition, 256)).await.unwrap();

        let listed = store.list_by_partition(partition).await.unwrap();
        let keys: Vec<(i64, i32)> = listed.iter().map(|e| (e.id, e.entry_type)).collect();
        assert_eq!(keys, vec![(1, 0), (1, 1), (2, 0)]);
    }

    #[tokio::test]
    async fn test_live_list_excludes_deleted() {
        let store = setup().await;
        let partition = PartitionId::new(0, 0);

        store.add(&entry(1, 0, partition, 0)).await.unwrap();
        store.add(&entry(2, 0, partition, 128)).await.unwrap();
        store.delete(1, 0).await.unwrap();

        let live = store.live_list_by_partition(partition).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, 2);

        let all = store.list_by_partition(partition).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_min_max_range() {
        let store = setup().await;
        let partition = PartitionId::new(0, 0);

        assert_eq!(store.min_max_range(partition).await.unwrap(), None);

        store.add(&entry(5, 0, partition, 0)).await.unwrap();
        store.add(&entry(3, 0, partition, 128)).await.unwrap();
        store.add(&entry(9, 0, partition, 256)).await.unwrap();

        assert_eq!(store.min_max_range(partition).await.unwrap(), Some((3, 9)));
    }

    #[tokio::test]
    async fn test_size_of_deleted() {
        let store = setup().await;
        let partition = PartitionId::new(0, 0);

        store.add(&entry(1, 0, partition, 0)).await.unwrap();
        store.add(&entry(2, 0, partition, 128)).await.unwrap();
        store.add(&entry(3, 0, partition, 256)).await.unwrap();

        assert_eq!(store.size_of_deleted(partition).await.unwrap(), 0);

        store.delete(1, 0).await.unwrap();
        store.delete(2, 0).await.unwrap();

        assert_eq!(store.size_of_deleted(partition).await.unwrap(), 256);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = setup().await;
        store.add(&entry(1, 0, PartitionId::new(0, 0), 0)).await.unwrap();

        store.delete(1, 0).await.unwrap();
        store.delete(1, 0).await.unwrap();
        store.delete(42, 0).await.unwrap();

        assert!(store.get_by_id(1, 0).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn test_restore_clears_tombstone() {
        let store = setup().await;
        store.add(&entry(1, 0, PartitionId::new(0, 0), 0)).await.unwrap();
        store.delete(1, 0).await.unwrap();

        store.restore(1, 0).await.unwrap();
        assert!(!store.get_by_id(1, 0).await.unwrap().unwrap().deleted);

        assert!(matches!(
            store.restore(42, 0).await,
            Err(IndexError::EntryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_move_entry_repoints_partition_and_offset() {
        let store = setup().await;
        let old = PartitionId::new(0, 0);
        let new = PartitionId::new(0, 1);

        store.add(&entry(1, 0, old, 512)).await.unwrap();
        store.move_entry(1, 0, new, 0).await.unwrap();

        let moved = store.get_by_id(1, 0).await.unwrap().unwrap();
        assert_eq!(moved.partition, new);
        assert_eq!(moved.offset, 0);

        assert!(store.list_by_partition(old).await.unwrap().is_empty());
    }

    // ---------------------------------------------------------------
    // Temp index
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_temp_index_roundtrip() {
        let store = setup().await;
        let temp = TempIndexEntry {
            id: 1,
            entry_type: 0,
            path: "/tmp/upload-1".to_string(),
            metadata: Metadata::new(),
            created_at: 100,
        };

        store.add_temp(&temp).await.unwrap();
        assert_eq!(store.temp_index_list(10).await.unwrap(), vec![temp]);

        store.delete_temp(1, 0).await.unwrap();
        assert!(store.temp_index_list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_temp_index_replay_is_idempotent() {
        let store = setup().await;
        let temp = TempIndexEntry {
            id: 1,
            entry_type: 0,
            path: "/tmp/upload-1".to_string(),
            metadata: Metadata::new(),
            created_at: 100,
        };

        store.add_temp(&temp).await.unwrap();
        store.add_temp(&temp).await.unwrap();

        assert_eq!(store.temp_index_list(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_temp_index_respects_limit_and_order() {
        let store = setup().await;
        for i in 0..5 {
            store
                .add_temp(&TempIndexEntry {
                    id: i,
                    entry_type: 0,
                    path: format!("/tmp/upload-{}", i),
                    metadata: Metadata::new(),
                    created_at: 100 - i,
                })
                .await
                .unwrap();
        }

        let listed = store.temp_index_list(3).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, 4); // oldest first
    }

    // ---------------------------------------------------------------
    // Partitions
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_partition_roundtrip() {
        let store = setup().await;
        let partition = Partition::new(PartitionId::new(0, 0));

        store.add_partition(&partition).await.unwrap();

        let got = store.partition(partition.id).await.unwrap().unwrap();
        assert_eq!(got, partition);
        assert!(got.tree.is_none());
    }

    #[tokio::test]
    async fn test_add_partition_is_idempotent() {
        let store = setup().await;
        let partition = Partition::new(PartitionId::new(0, 0));

        store.add_partition(&partition).await.unwrap();
        store.add_partition(&partition).await.unwrap();

        assert_eq!(store.partitions(0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partitions_ordered_by_id() {
        let store = setup().await;
        for id in [2u32, 0, 1] {
            store
                .add_partition(&Partition::new(PartitionId::new(0, id)))
                .await
                .unwrap();
        }
        store
            .add_partition(&Partition::new(PartitionId::new(1, 0)))
            .await
            .unwrap();

        let listed = store.partitions(0).await.unwrap();
        let ids: Vec<u32> = listed.iter().map(|p| p.id.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_update_tree_persists() {
        let store = setup().await;
        let id = PartitionId::new(0, 0);
        store.add_partition(&Partition::new(id)).await.unwrap();

        let tree = MerkleTree::empty(OffsetRange::new(0, 100), 5).unwrap();
        store.update_tree(id, &tree).await.unwrap();

        let got = store.partition(id).await.unwrap().unwrap();
        assert_eq!(got.tree, Some(tree));
    }

    #[tokio::test]
    async fn test_update_tree_missing_partition_fails() {
        let store = setup().await;
        let tree = MerkleTree::empty(OffsetRange::new(0, 100), 5).unwrap();

        assert!(matches!(
            store.update_tree(PartitionId::new(9, 9), &tree).await,
            Err(IndexError::PartitionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_partition_state_and_size() {
        let store = setup().await;
        let id = PartitionId::new(0, 0);
        store.add_partition(&Partition::new(id)).await.unwrap();

        let updated = Partition {
            id,
            state: PartitionState::Closed,
            crc: 7,
            size: 1024,
            tree: None,
        };
        store.update_partition(&updated).await.unwrap();

        let got = store.partition(id).await.unwrap().unwrap();
        assert_eq!(got.state, PartitionState::Closed);
        assert_eq!(got.size, 1024);
        assert_eq!(got.crc, 7);
    }

    #[tokio::test]
    async fn test_delete_partition() {
        let store = setup().await;
        let id = PartitionId::new(0, 0);
        store.add_partition(&Partition::new(id)).await.unwrap();

        store.delete_partition(id).await.unwrap();
        assert!(store.partition(id).await.unwrap().is_none());
    }
}
