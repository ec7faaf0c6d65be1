//! Error Types for Blobhouse Core
//!
//! All functions in this crate return `Result<T>` aliased to
//! `Result<T, Error>`, so `?` propagation composes with the other crates'
//! error enums via `#[from]`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Two trees cannot be diffed unless they share range and level.
    #[error("incompatible trees: {left} vs {right}")]
    IncompatibleTrees { left: String, right: String },

    #[error("invalid range: [{lo}, {hi})")]
    InvalidRange { lo: u64, hi: u64 },

    #[error("invalid max level: {0}")]
    InvalidLevel(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
