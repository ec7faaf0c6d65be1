//! Block Descriptor
//!
//! A `Block` is the canonical 28-byte summary of one stored blob: its id,
//! type discriminator, payload checksum and payload length. Blocks are the
//! unit the Merkle tree hashes; the payload bytes themselves never enter
//! the tree, only this fixed-layout digest of them.
//!
//! ## Canonical encoding
//!
//! ```text
//! ┌────────┬──────────┬────────┬──────────┐
//! │ id     │ type     │ crc    │ length   │
//! │ (8 BE) │ (4 BE)   │ (8 BE) │ (8 BE)   │
//! └────────┴──────────┴────────┴──────────┘
//! ```
//!
//! The encoding must match bit-for-bit across peers; every field is written
//! big-endian and the layout is versionless by design.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Canonical encoded size of one block: 8 + 4 + 8 + 8 bytes.
pub const ENCODED_LEN: usize = 28;

/// The 28-byte descriptor of a stored blob, used as Merkle leaf input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Blob id.
    pub id: i64,

    /// Type discriminator (original, transcoded, ...).
    pub block_type: i32,

    /// Payload checksum.
    pub crc: u64,

    /// Payload length in bytes.
    pub length: u64,
}

impl Block {
    pub fn new(id: i64, block_type: i32, crc: u64, length: u64) -> Self {
        Self {
            id,
            block_type,
            crc,
            length,
        }
    }

    /// Canonical big-endian encoding, identical on every peer.
    pub fn encode(&self) -> [u8; ENCODED_LEN] {
        let mut buf = [0u8; ENCODED_LEN];
        buf[0..8].copy_from_slice(&self.id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.block_type.to_be_bytes());
        buf[12..20].copy_from_slice(&self.crc.to_be_bytes());
        buf[20..28].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Ordering used whenever blocks are listed: id ascending, then type.
    pub fn cmp_by_id_type(&self, other: &Block) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.block_type.cmp(&other.block_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let block = Block::new(1, 2, 3, 4);
        let bytes = block.encode();

        assert_eq!(bytes.len(), ENCODED_LEN);
        assert_eq!(&bytes[0..8], &1i64.to_be_bytes());
        assert_eq!(&bytes[8..12], &2i32.to_be_bytes());
        assert_eq!(&bytes[12..20], &3u64.to_be_bytes());
        assert_eq!(&bytes[20..28], &4u64.to_be_bytes());
    }

    #[test]
    fn test_encode_is_deterministic() {
        let a = Block::new(42, 1, 0xDEAD_BEEF, 128);
        let b = Block::new(42, 1, 0xDEAD_BEEF, 128);
        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn test_encode_differs_per_field() {
        let base = Block::new(1, 1, 1, 1);
        assert_ne!(base.encode(), Block::new(2, 1, 1, 1).encode());
        assert_ne!(base.encode(), Block::new(1, 2, 1, 1).encode());
        assert_ne!(base.encode(), Block::new(1, 1, 2, 1).encode());
        assert_ne!(base.encode(), Block::new(1, 1, 1, 2).encode());
    }

    #[test]
    fn test_ordering_by_id_then_type() {
        let mut blocks = vec![
            Block::new(2, 0, 0, 1),
            Block::new(1, 2, 0, 1),
            Block::new(1, 1, 0, 1),
        ];
        blocks.sort_by(|a, b| a.cmp_by_id_type(b));

        assert_eq!(blocks[0], Block::new(1, 1, 0, 1));
        assert_eq!(blocks[1], Block::new(1, 2, 0, 1));
        assert_eq!(blocks[2], Block::new(2, 0, 0, 1));
    }

    #[test]
    fn test_negative_id_encodes_sign() {
        let block = Block::new(-1, 0, 0, 1);
        assert_eq!(&block.encode()[0..8], &(-1i64).to_be_bytes());
    }
}
