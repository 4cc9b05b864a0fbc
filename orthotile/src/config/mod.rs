//! User configuration (`~/.orthotile/config.ini`).
//!
//! Settings structs live in [`settings`], constants in [`defaults`], INI
//! parsing in `parser` and human-readable sizes in [`size`].
//!
//! ```
//! use orthotile::config::ConfigFile;
//!
//! let config = ConfigFile::default();
//! assert_eq!(config.cache.tile_size, 256);
//! ```

pub mod defaults;
mod file;
mod parser;
pub mod settings;
pub mod size;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{CacheSettings, ConfigFile, ImagerySettings, LoggingSettings, NetworkSettings};
pub use size::{format_size, parse_size, Size, SizeParseError};
