//! Write-Path Domain Types
//!
//! `StorageFile` is what the ingest layer pushes onto a disk's write queue:
//! an id, a type discriminator and exactly one payload source, either bytes
//! already in memory or a staged file on disk. `ReplicationFile` is the
//! self-describing unit shipped to peers: the finished index entry plus the
//! payload bytes, everything a slave needs to apply the write locally.

use crate::error::{Error, Result};
use blobhouse_index::{IndexEntry, Metadata};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata key whose values are treated as access tokens for the blob.
pub const AUTH_TOKEN_KEY: &str = "X-Metadata-Auth-Token";

/// A blob waiting to be appended by a disk writer.
#[derive(Debug, Clone)]
pub struct StorageFile {
    id: i64,
    entry_type: i32,
    data: Option<Bytes>,
    path: Option<PathBuf>,
    length: u64,
    name: Option<String>,
    metadata: Metadata,
    auth_tokens: Vec<String>,
    compaction: bool,
}

impl StorageFile {
    pub fn builder() -> StorageFileBuilder {
        StorageFileBuilder::default()
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn entry_type(&self) -> i32 {
        self.entry_type
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Staged upload path, when the payload lives on disk.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// True for compaction rewrites: copy-append, no re-replication.
    pub fn is_compaction(&self) -> bool {
        self.compaction
    }

    pub fn has_auth_tokens(&self) -> bool {
        !self.auth_tokens.is_empty()
    }

    pub fn auth_tokens(&self) -> &[String] {
        &self.auth_tokens
    }

    /// The payload bytes, reading the staged file if necessary.
    pub async fn read_data(&self) -> Result<Bytes> {
        if let Some(data) = &self.data {
            return Ok(data.clone());
        }
        if let Some(path) = &self.path {
            return Ok(Bytes::from(tokio::fs::read(path).await?));
        }
        Err(Error::InvalidStorageFile(
            "file or data must be set".to_string(),
        ))
    }
}

#[derive(Default)]
pub struct StorageFileBuilder {
    id: i64,
    entry_type: i32,
    data: Option<Bytes>,
    path: Option<PathBuf>,
    length: u64,
    name: Option<String>,
    metadata: Metadata,
    compaction: bool,
}

impl StorageFileBuilder {
    pub fn id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn entry_type(mut self, entry_type: i32) -> Self {
        self.entry_type = entry_type;
        self
    }

    pub fn data(mut self, data: Bytes) -> Self {
        self.length = data.len() as u64;
        self.data = Some(data);
        self
    }

    /// Use a staged file as the payload source; `length` must be the staged
    /// file's size.
    pub fn path(mut self, path: PathBuf, length: u64) -> Self {
        self.path = Some(path);
        self.length = length;
        self
    }

    pub fn name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn compaction(mut self, compaction: bool) -> Self {
        self.compaction = compaction;
        self
    }

    pub fn build(self) -> Result<StorageFile> {
        if self.data.is_some() == self.path.is_some() {
            return Err(Error::InvalidStorageFile(
                "exactly one of file or data must be set".to_string(),
            ));
        }
        if self.length == 0 {
            return Err(Error::InvalidStorageFile(
                "zero length files are not acceptable".to_string(),
            ));
        }

        let auth_tokens = self
            .metadata
            .get(AUTH_TOKEN_KEY)
            .cloned()
            .unwrap_or_default();

        Ok(StorageFile {
            id: self.id,
            entry_type: self.entry_type,
            data: self.data,
            path: self.path,
            length: self.length,
            name: self.name,
            metadata: self.metadata,
            auth_tokens,
            compaction: self.compaction,
        })
    }
}

/// A fully applied write: index entry plus payload, shipped to every peer
/// and applied verbatim on arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationFile {
    pub entry: IndexEntry,
    pub data: Bytes,
}
