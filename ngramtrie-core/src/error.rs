//! Error taxonomy for the n-gram frequency store.
//!
//! Covers I/O failure, format mismatch, allocation exhaustion, invalid
//! input, and capacity exceeded. Arena/node-pool exhaustion is reported
//! here as a proper `Result` rather than a raw null-sentinel return, so
//! callers never have to compare against `NULL` themselves.

use std::io;

/// Errors raised by trie construction, packing, and (de)serialization.
#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bad signature: expected {expected:?}, found {found:?}")]
    BadSignature {
        expected: &'static [u8],
        found: Vec<u8>,
    },

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("bits-per-level mismatch: file has {file}, reader compiled for {reader}")]
    BitsPerLevelMismatch { file: u8, reader: u8 },

    #[error("unsupported bits-per-level value {0}; supported: 2, 3, 4, 8")]
    UnsupportedBitsPerLevel(u8),

    #[error("node pool exhausted: cannot allocate another node (capacity {0})")]
    CapacityExceeded(usize),

    #[error("frequency arena exhausted: cannot allocate another record (capacity {0})")]
    ArenaExhausted(usize),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("bincode (de)serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, TrieError>;
