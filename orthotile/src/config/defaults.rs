//! Default values and clamping helpers for configuration.

use std::path::PathBuf;

use tracing::warn;

/// Projection requested from sources when none is configured.
pub const DEFAULT_PROJECTION: &str = "EPSG:3857";

pub const DEFAULT_TILE_SIZE: u32 = 256;
pub const MIN_TILE_SIZE: u32 = 16;
pub const MAX_TILE_SIZE: u32 = 4096;

/// Decoded images kept in memory (64 MB).
pub const DEFAULT_MEMORY_SIZE: u64 = crate::cache::DEFAULT_MEMORY_SIZE;

/// Disk budget per source before eviction (512 MB).
pub const DEFAULT_MAX_SIZE: u64 = 512 * 1024 * 1024;

/// Files at or below this size are removed by `cache clean`.
pub const DEFAULT_SMALL_FILE_THRESHOLD: u64 = 0;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_WMTS_THREADS: usize = 10;
pub const DEFAULT_WMS_THREADS: usize = 5;
pub const DEFAULT_TMS_THREADS: usize = 25;
pub const DEFAULT_MAX_PER_HOST: usize = 6;
pub const MAX_THREADS: usize = 64;

/// Retries after a 503 before the tile is reported as failed.
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

pub const DEFAULT_LOG_FILE: &str = "orthotile.log";

/// Default `User-Agent` header.
pub fn default_user_agent() -> String {
    format!("orthotile/{}", crate::VERSION)
}

/// Default cache root (`<cache dir>/orthotile`).
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("orthotile")
}

/// Default log directory (`~/.orthotile/logs`).
pub fn default_log_dir() -> PathBuf {
    super::file::config_directory().join("logs")
}

/// Clamp a pool size into `1..=MAX_THREADS`, warning when it changes.
pub fn clamp_threads(key: &str, value: usize) -> usize {
    let clamped = value.clamp(1, MAX_THREADS);
    if clamped != value {
        warn!(key, value, clamped, "Thread count out of range, clamping");
    }
    clamped
}

/// Clamp a tile size into `MIN_TILE_SIZE..=MAX_TILE_SIZE`, warning when it changes.
pub fn clamp_tile_size(value: u32) -> u32 {
    let clamped = value.clamp(MIN_TILE_SIZE, MAX_TILE_SIZE);
    if clamped != value {
        warn!(value, clamped, "Tile size out of range, clamping");
    }
    clamped
}
