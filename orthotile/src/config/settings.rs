//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.

use std::path::PathBuf;
use std::time::Duration;

use super::defaults::*;
use crate::cache::{
    CacheOptions, MatchTolerances, DEFAULT_BORDER_RATIO, DEFAULT_MATCH_EPSILON, DEFAULT_SCALE_WINDOW,
};
use crate::fetch::{FetchTimeouts, NoTilePolicy};

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub imagery: ImagerySettings,
    pub cache: CacheSettings,
    pub network: NetworkSettings,
    pub logging: LoggingSettings,
}

/// The imagery source to use when the command line doesn't name one.
#[derive(Debug, Clone)]
pub struct ImagerySettings {
    /// Capabilities document URL (WMTS) or tile URL template (WMS/TMS).
    pub url: Option<String>,
    pub layer: Option<String>,
    /// Preferred tile matrix set when a layer offers several in one CRS.
    pub matrix_set: Option<String>,
    pub projection: String,
    /// Response headers whose presence with the given value means "no tile".
    pub no_tile_headers: Vec<(String, String)>,
    /// Response statuses meaning "no tile".
    pub no_tile_status: Vec<u16>,
}

impl Default for ImagerySettings {
    fn default() -> Self {
        Self {
            url: None,
            layer: None,
            matrix_set: None,
            projection: DEFAULT_PROJECTION.to_string(),
            no_tile_headers: Vec::new(),
            no_tile_status: Vec::new(),
        }
    }
}

impl ImagerySettings {
    pub fn no_tile_policy(&self) -> NoTilePolicy {
        NoTilePolicy::new(self.no_tile_status.clone(), self.no_tile_headers.clone())
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub tile_size: u32,
    /// Bytes of decoded images kept in memory.
    pub memory_size: u64,
    /// Bytes of tile files kept on disk per source.
    pub max_size: u64,
    pub small_file_threshold: u64,
    pub scale_window: f64,
    pub border_ratio: f64,
    pub match_epsilon: f64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            tile_size: DEFAULT_TILE_SIZE,
            memory_size: DEFAULT_MEMORY_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            small_file_threshold: DEFAULT_SMALL_FILE_THRESHOLD,
            scale_window: DEFAULT_SCALE_WINDOW,
            border_ratio: DEFAULT_BORDER_RATIO,
            match_epsilon: DEFAULT_MATCH_EPSILON,
        }
    }
}

impl CacheSettings {
    pub fn tolerances(&self) -> MatchTolerances {
        MatchTolerances {
            match_epsilon: self.match_epsilon,
            scale_window: self.scale_window,
            border_ratio: self.border_ratio,
        }
    }

    pub fn options(&self) -> CacheOptions {
        CacheOptions::new(self.tile_size)
            .with_memory_size(self.memory_size)
            .with_tolerances(self.tolerances())
            .with_max_size(self.max_size)
    }
}

/// Network configuration.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    /// Seconds.
    pub connect_timeout: u64,
    /// Seconds.
    pub read_timeout: u64,
    pub wmts_threads: usize,
    pub wms_threads: usize,
    pub tms_threads: usize,
    pub max_per_host: usize,
    pub retry_count: u32,
    /// Milliseconds between 503 retries.
    pub retry_delay: u64,
    pub user_agent: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout: DEFAULT_READ_TIMEOUT_SECS,
            wmts_threads: DEFAULT_WMTS_THREADS,
            wms_threads: DEFAULT_WMS_THREADS,
            tms_threads: DEFAULT_TMS_THREADS,
            max_per_host: DEFAULT_MAX_PER_HOST,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY_MS,
            user_agent: default_user_agent(),
        }
    }
}

impl NetworkSettings {
    pub fn timeouts(&self) -> FetchTimeouts {
        FetchTimeouts {
            connect: Duration::from_secs(self.connect_timeout),
            read: Duration::from_secs(self.read_timeout),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}
