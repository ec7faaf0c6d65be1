//! Blobhouse Core Types
//!
//! This crate holds the pure data structures shared by every other Blobhouse
//! crate; nothing here performs I/O.
//!
//! ## Main Components
//!
//! ### Block
//! The 28-byte canonical descriptor of one stored blob (id, type, crc,
//! length). Blocks are what the Merkle tree hashes: two replicas agree on a
//! partition's contents exactly when they agree on the canonical bytes of
//! every block in it.
//!
//! ### IdGenerator
//! Time-shifted 64-bit id allocator. Ids are strictly increasing per
//! process, so index scans ordered by id are also ordered by creation time.
//!
//! ### MerkleTree
//! A fixed-shape hash tree over a partition's offset range. Two peers build
//! trees over the same `(range, max_level)` and exchange them to locate
//! divergent offset windows in O(differences · log N) instead of shipping
//! the whole index.

pub mod block;
pub mod error;
pub mod id;
pub mod merkle;

pub use block::Block;
pub use error::{Error, Result};
pub use id::IdGenerator;
pub use merkle::{MerkleTree, OffsetRange, HASH_LEN, MAX_LEVEL};
