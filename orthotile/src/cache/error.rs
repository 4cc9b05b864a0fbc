//! Cache error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the tile cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// File system failure.
    #[error("Cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index file could not be (de)serialised.
    #[error("Cache index error: {0}")]
    Index(#[from] serde_json::Error),

    /// A decoded image could not be re-encoded for storage.
    #[error("Failed to encode tile: {0}")]
    Encode(#[from] image::ImageError),

    /// Cached file exists but is unusable. The entry is pruned.
    #[error("Corrupt cache file {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    /// Source directory mapping could not be read.
    #[error("Cache layout file error: {0}")]
    Layout(#[from] ini::Error),
}
