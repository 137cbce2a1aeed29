//! Error types for the trigram index.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or querying an index.
#[derive(Debug, Error)]
pub enum Error {
    /// A single input file could not be opened or read. The indexer rolls
    /// back the partially-inserted file and the caller may skip it.
    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed include/exclude glob pattern.
    #[error("invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    /// Index file data failed validation.
    #[error("corrupt index: {reason}")]
    CorruptIndex { reason: String },

    /// A posting append was not strictly increasing. The encoder never
    /// produces this on well-formed input; it indicates an indexer bug.
    #[error("posting id out of order: {id} after {last_id}")]
    OutOfOrder { last_id: u32, id: u32 },

    /// Invalid search pattern.
    #[error("malformed regular expression {pattern:?}: {reason}")]
    MalformedRegex { pattern: String, reason: String },

    /// No index directory found at or above the starting directory.
    #[error("index not found under {}", .0.display())]
    IndexNotFound(PathBuf),

    /// I/O error on the index store itself.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
