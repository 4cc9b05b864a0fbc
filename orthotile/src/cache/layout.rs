//! Mapping of source URLs to cache directories.
//!
//! Every source gets its own numbered directory under the cache root so
//! sources never share an index. The mapping lives in `layers.ini`:
//!
//! ```ini
//! [source.1]
//! url = https://tiles.example.com/wmts/1.0.0/WMTSCapabilities.xml
//! key = 3b1f...
//! ```
//!
//! The `key` (SHA-256 of the URL) is what lookups compare; the URL is kept
//! for people browsing the cache.

use std::fs;
use std::path::{Path, PathBuf};

use ini::Ini;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::error::CacheError;

/// Name of the mapping file at the cache root.
pub const LAYOUT_FILE: &str = "layers.ini";

const SECTION_PREFIX: &str = "source.";

/// Allocates and remembers one cache directory per source.
#[derive(Debug)]
pub struct SourceDirectories {
    root: PathBuf,
    lock: Mutex<()>,
}

impl SourceDirectories {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `source_url`, allocating a new one on first use.
    pub fn directory_for(&self, source_url: &str) -> Result<PathBuf, CacheError> {
        let _guard = self.lock.lock();
        fs::create_dir_all(&self.root)?;

        let path = self.root.join(LAYOUT_FILE);
        let mut ini = if path.exists() {
            Ini::load_from_file(&path)?
        } else {
            Ini::new()
        };

        let key = url_key(source_url);
        let mut highest = 0u32;
        for (section, properties) in ini.iter() {
            let Some(number) = section
                .and_then(|s| s.strip_prefix(SECTION_PREFIX))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            if properties.get("key") == Some(key.as_str()) {
                return Ok(self.root.join(number.to_string()));
            }
            highest = highest.max(number);
        }

        let number = highest + 1;
        ini.with_section(Some(format!("{}{}", SECTION_PREFIX, number)))
            .set("url", source_url)
            .set("key", key);
        ini.write_to_file(&path)?;

        let dir = self.root.join(number.to_string());
        fs::create_dir_all(&dir)?;
        debug!(url = source_url, dir = %dir.display(), "Allocated cache directory for source");
        Ok(dir)
    }

    /// All known `(url, directory)` pairs.
    pub fn sources(&self) -> Result<Vec<(String, PathBuf)>, CacheError> {
        let path = self.root.join(LAYOUT_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let ini = Ini::load_from_file(&path)?;
        Ok(ini
            .iter()
            .filter_map(|(section, properties)| {
                let number = section?.strip_prefix(SECTION_PREFIX)?;
                Some((properties.get("url")?.to_string(), self.root.join(number)))
            })
            .collect())
    }
}

/// Hex SHA-256 of a URL, used wherever a URL must become a stable key.
pub(crate) fn url_key(url: &str) -> String {
    Sha256::digest(url.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
