//! `trigrep` — trigram inverted index for fast substring and regex search.
//!
//! The index maps every 3-byte sequence occurring in an indexed file to the
//! delta-compressed set of file ids containing it. A query is planned into
//! a DAG of necessary byte sequences; intersecting the posting lists of the
//! DAG's trigram windows yields a candidate superset, which the caller
//! verifies by direct matching.
//!
//! # Modules
//!
//! - `trigram`   — 24-bit packing helpers
//! - `posting`   — delta-varint posting lists (`CompressedIds`)
//! - `format`    — on-disk layout constants and the `.list` record
//! - `file_list` — dense path ↔ id table
//! - `ids`       — Roaring-backed candidate id sets
//! - `indexer`   — tokenization, chunk flush, external merge
//! - `reader`    — mmap-based index reader with a per-trigram cache
//! - `queue`     — bounded producer/consumer work queue
//! - `plan`      — pattern planner DAG and its BRE/ERE parser
//! - `pattern`   — per-line verification matchers
//! - `glob`      — include/exclude path filtering
//! - `error`     — crate error type

pub mod error;
pub mod file_list;
pub mod format;
pub mod glob;
pub mod ids;
pub mod indexer;
pub mod pattern;
pub mod plan;
pub mod posting;
pub mod queue;
pub mod reader;
pub mod trigram;

// Re-export key types for convenience.
pub use error::{Error, Result};
pub use ids::IdSet;
pub use indexer::{IndexStats, Indexer};
pub use pattern::{Matcher, Mode};
pub use plan::Plan;
pub use posting::CompressedIds;
pub use queue::WorkQueue;
pub use reader::{locate_index_dir, IndexReader};
