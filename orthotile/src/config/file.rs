//! Configuration file handling for ~/.orthotile/config.ini.

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use super::settings::ConfigFile;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigFile {
    /// Load configuration from the default path (~/.orthotile/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }
}

/// Get the path to the config directory (~/.orthotile).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".orthotile")
}

/// Get the path to the config file (~/.orthotile/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_SIZE;
    use std::fs;

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp_dir.path().join("missing.ini")).unwrap();

        assert_eq!(config.cache.max_size, DEFAULT_MAX_SIZE);
        assert_eq!(config.cache.options().max_size, Some(DEFAULT_MAX_SIZE));
        assert_eq!(config.logging.file, "orthotile.log");
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");
        fs::write(&path, "[imagery]\nlayer = ortho\n\n[logging]\nfile = tiles.log\n").unwrap();

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.imagery.layer.as_deref(), Some("ortho"));
        assert_eq!(config.logging.file, "tiles.log");
    }

    #[test]
    fn test_config_file_path() {
        assert!(config_file_path().ends_with(".orthotile/config.ini"));
    }
}
