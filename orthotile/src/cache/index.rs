//! On-disk cache index (`index.json`).
//!
//! The index records, per projection, every cached tile's scale, origin,
//! file name and timestamps, plus the tile size the cache was built for and
//! the total size of the files it references.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::CacheError;

/// Index file name within a source's cache directory.
pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IndexFile {
    pub tile_size: u32,
    pub total_file_size: u64,
    #[serde(default)]
    pub projections: Vec<ProjectionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ProjectionRecord {
    pub code: String,
    pub directory: String,
    #[serde(default)]
    pub entries: Vec<EntryRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EntryRecord {
    pub pixels_per_unit: f64,
    pub east: f64,
    pub north: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub no_tile: bool,
    pub last_used: i64,
    pub last_modified: i64,
}

/// Read the index, `Ok(None)` when it doesn't exist yet.
pub(crate) fn read_index(path: &Path) -> Result<Option<IndexFile>, CacheError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Write the index through a temporary file so a crash never leaves a
/// truncated index behind.
pub(crate) fn write_index(path: &Path, index: &IndexFile) -> Result<(), CacheError> {
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(index)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
