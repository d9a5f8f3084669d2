//! ngramtrie-core
//!
//! Bit-sliced, arena-allocated trie over byte keys and its packed
//! read-only on-disk form, for statistical n-gram language identification.
//! This crate implements the multi-language frequency store: building a
//! writable trie per language, merging languages into one multi-language
//! trie, and packing that into a compact, memory-mappable form a scorer
//! can traverse without touching the writable representation.
//!
//! Modules, leaves first:
//! - [`freq`] — fixed-point frequency scaling and smoothing.
//! - [`keys`] — byte-to-nybble expansion for the trie's configurable
//!   fan-out.
//! - [`wt`] — single-language writable trie.
//! - [`mwt`] — multi-language writable trie.
//! - [`pt`] — packed read-only trie.
//! - [`builder`] — the training pipeline phases that drive the above.
//! - [`trigram`] — dense trigram/bigram counting, the builder's phase 1.
//! - [`preprocessing`] — the external byte-stream interface.
//! - [`format`] — on-disk file formats for both trie forms.
//! - [`error`] — the error taxonomy raised across all of the above.

pub mod error;
pub mod freq;
pub mod keys;

pub mod wt;
pub use wt::WritableTrie;

pub mod mwt;
pub use mwt::MultiWritableTrie;

pub mod pt;
pub use pt::{PackedTrie, ValueMap};

pub mod preprocessing;
pub use preprocessing::{BigramMode, ByteSource};

pub mod trigram;
pub use trigram::TrigramCounter;

pub mod builder;
pub use builder::{Builder, BuilderConfig, CoverageStats};

pub mod format;

pub use error::{Result, TrieError};
pub use keys::BitsPerLevel;
