//! Persistent tile cache.
//!
//! A [`TileCacheStore`] answers exact lookups by scale and origin, composes
//! partial answers from overlapping tiles at nearby scales, and remembers
//! tiles the server has no imagery for. [`SourceDirectories`] hands each
//! source its own store directory under the cache root.

mod composite;
mod entry;
mod error;
mod index;
mod layout;
mod maintenance;
mod store;

use std::fmt;

pub use entry::{MatchTolerances, DEFAULT_BORDER_RATIO, DEFAULT_MATCH_EPSILON, DEFAULT_SCALE_WINDOW};
pub use error::CacheError;
pub use index::INDEX_FILE;
pub use layout::{SourceDirectories, LAYOUT_FILE};
pub use maintenance::MaintenanceReport;
pub use store::{
    CacheOptions, CachedTile, TileCacheStore, TileData, DEFAULT_MEMORY_SIZE,
    DEFAULT_NO_TILE_MAX_AGE, INDEX_SAVE_INTERVAL,
};

pub(crate) use layout::url_key;

/// Snapshot of cache counters and sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Index entries, no-tile markers included.
    pub entries: usize,
    pub no_tile_markers: usize,
    /// Bytes of all cached files on disk.
    pub total_bytes: u64,
    /// Decoded images held in memory.
    pub memory_images: u64,
    pub memory_bytes: u64,
    pub exact_hits: u64,
    pub exact_misses: u64,
    pub partial_hits: u64,
    pub partial_misses: u64,
}

impl CacheStats {
    /// Exact-match hit rate in `[0, 1]`, zero before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.exact_hits + self.exact_misses;
        if total == 0 {
            0.0
        } else {
            self.exact_hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Entries:        {} ({} no-tile)", self.entries, self.no_tile_markers)?;
        writeln!(f, "Disk usage:     {}", crate::config::format_size(self.total_bytes))?;
        writeln!(
            f,
            "Memory:         {} images, {}",
            self.memory_images,
            crate::config::format_size(self.memory_bytes)
        )?;
        writeln!(
            f,
            "Exact lookups:  {} hits, {} misses ({:.1}%)",
            self.exact_hits,
            self.exact_misses,
            self.hit_rate() * 100.0
        )?;
        write!(
            f,
            "Partial:        {} hits, {} misses",
            self.partial_hits, self.partial_misses
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            exact_hits: 3,
            exact_misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_display_mentions_markers() {
        let stats = CacheStats {
            entries: 4,
            no_tile_markers: 1,
            ..CacheStats::default()
        };
        assert!(stats.to_string().contains("4 (1 no-tile)"));
    }
}
