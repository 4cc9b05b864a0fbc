//! INI parsing: `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};
use tracing::warn;

use super::defaults::{clamp_threads, clamp_tile_size};
use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;

/// Parse an `Ini` into a `ConfigFile`, overlaying values on the defaults.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [imagery]
    if let Some(section) = ini.section(Some("imagery")) {
        config.imagery.url = non_empty(section, "url");
        config.imagery.layer = non_empty(section, "layer");
        config.imagery.matrix_set = non_empty(section, "matrix_set");
        if let Some(v) = non_empty(section, "projection") {
            config.imagery.projection = v.to_ascii_uppercase();
        }
        if let Some(v) = section.get("no_tile_headers") {
            config.imagery.no_tile_headers = parse_header_pairs(v)?;
        }
        if let Some(v) = section.get("no_tile_status") {
            config.imagery.no_tile_status = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_value("imagery", "no_tile_status", s, "must be HTTP status codes"))
                .collect::<Result<_, _>>()?;
        }
    }

    // [cache]
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = non_empty(section, "directory") {
            config.cache.directory = expand_tilde(&v);
        }
        if let Some(v) = section.get("tile_size") {
            let size: u32 = parse_value("cache", "tile_size", v, "must be a positive integer")?;
            config.cache.tile_size = clamp_tile_size(size);
        }
        if let Some(v) = section.get("memory_size") {
            config.cache.memory_size = size_value("cache", "memory_size", v)?;
        }
        if let Some(v) = section.get("max_size") {
            config.cache.max_size = size_value("cache", "max_size", v)?;
        }
        if let Some(v) = section.get("small_file_threshold") {
            config.cache.small_file_threshold = size_value("cache", "small_file_threshold", v)?;
        }
        if let Some(v) = section.get("scale_window") {
            let window: f64 = parse_value("cache", "scale_window", v, "must be a number")?;
            if !(window > 1.0 && window.is_finite()) {
                return Err(invalid("cache", "scale_window", v, "must be greater than 1"));
            }
            config.cache.scale_window = window;
        }
        if let Some(v) = section.get("border_ratio") {
            let ratio: f64 = parse_value("cache", "border_ratio", v, "must be a number")?;
            let clamped = ratio.clamp(0.0, 0.25);
            if clamped != ratio {
                warn!(value = ratio, clamped, "border_ratio out of range, clamping");
            }
            config.cache.border_ratio = clamped;
        }
        if let Some(v) = section.get("match_epsilon") {
            let epsilon: f64 = parse_value("cache", "match_epsilon", v, "must be a number")?;
            if !(epsilon > 0.0 && epsilon < 1e-2) {
                return Err(invalid("cache", "match_epsilon", v, "must be between 0 and 0.01"));
            }
            config.cache.match_epsilon = epsilon;
        }
    }

    // [network]
    if let Some(section) = ini.section(Some("network")) {
        if let Some(v) = section.get("connect_timeout") {
            config.network.connect_timeout =
                parse_value("network", "connect_timeout", v, "must be a positive integer (seconds)")?;
        }
        if let Some(v) = section.get("read_timeout") {
            config.network.read_timeout =
                parse_value("network", "read_timeout", v, "must be a positive integer (seconds)")?;
        }
        for (key, slot) in [
            ("wmts_threads", &mut config.network.wmts_threads),
            ("wms_threads", &mut config.network.wms_threads),
            ("tms_threads", &mut config.network.tms_threads),
            ("max_per_host", &mut config.network.max_per_host),
        ] {
            if let Some(v) = section.get(key) {
                let parsed: usize = parse_value("network", key, v, "must be a positive integer")?;
                *slot = clamp_threads(key, parsed);
            }
        }
        if let Some(v) = section.get("retry_count") {
            config.network.retry_count =
                parse_value("network", "retry_count", v, "must be a non-negative integer")?;
        }
        if let Some(v) = section.get("retry_delay") {
            config.network.retry_delay =
                parse_value("network", "retry_delay", v, "must be a non-negative integer (milliseconds)")?;
        }
        if let Some(v) = non_empty(section, "user_agent") {
            config.network.user_agent = v;
        }
    }

    // [logging]
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section, "directory") {
            config.logging.directory = expand_tilde(&v);
        }
        if let Some(v) = non_empty(section, "file") {
            config.logging.file = v;
        }
    }

    Ok(config)
}

fn non_empty(section: &Properties, key: &str) -> Option<String> {
    section
        .get(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value.trim().parse().map_err(|_| invalid(section, key, value, reason))
}

fn size_value(section: &str, key: &str, value: &str) -> Result<u64, ConfigFileError> {
    parse_size(value).map_err(|_| invalid(section, key, value, "expected format like '2GB', '500MB', or '1024KB'"))
}

/// `Name:value, Other:value` pairs.
fn parse_header_pairs(value: &str) -> Result<Vec<(String, String)>, ConfigFileError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once(':')
                .map(|(name, v)| (name.trim().to_string(), v.trim().to_string()))
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| invalid("imagery", "no_tile_headers", value, "expected 'Header:value' pairs"))
        })
        .collect()
}

/// Expand a leading `~` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home.join(rest.trim_start_matches('/'))
        }
        None => PathBuf::from(path),
    }
}
