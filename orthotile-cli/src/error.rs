//! CLI error handling with user-friendly messages.

use std::fmt;
use std::path::PathBuf;
use std::process;

use orthotile::cache::CacheError;
use orthotile::capabilities::CapabilitiesError;
use orthotile::config::ConfigFileError;
use orthotile::grid::ProjectionUnavailable;
use orthotile::source::SourceError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be read
    Config(ConfigFileError),
    /// Missing or contradictory arguments
    Usage(String),
    /// Capabilities could not be loaded
    Capabilities(CapabilitiesError),
    /// Tile source could not be built
    Source(SourceError),
    /// Layer has no matrix set for the projection
    Projection(ProjectionUnavailable),
    /// Tile cache failure
    Cache(CacheError),
    /// The requested tile could not be loaded
    Tile(String),
    /// Failed to write the output image
    ImageWrite {
        path: PathBuf,
        error: image::ImageError,
    },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Capabilities(CapabilitiesError::Fetch { .. }) => {
                eprintln!();
                eprintln!("Check that the URL points at a WMTS GetCapabilities document");
                eprintln!("and that the server is reachable from this machine.");
            }
            CliError::Projection(_) => {
                eprintln!();
                eprintln!("Run 'orthotile layers <url>' to see the projections each layer offers.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::Capabilities(e) => write!(f, "Failed to load capabilities: {}", e),
            CliError::Source(e) => write!(f, "Failed to create tile source: {}", e),
            CliError::Projection(e) => write!(f, "{}", e),
            CliError::Cache(e) => write!(f, "Tile cache error: {}", e),
            CliError::Tile(msg) => write!(f, "Failed to load tile: {}", msg),
            CliError::ImageWrite { path, error } => {
                write!(f, "Failed to write image '{}': {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Capabilities(e) => Some(e),
            CliError::Source(e) => Some(e),
            CliError::Projection(e) => Some(e),
            CliError::Cache(e) => Some(e),
            CliError::ImageWrite { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<CapabilitiesError> for CliError {
    fn from(e: CapabilitiesError) -> Self {
        CliError::Capabilities(e)
    }
}

impl From<SourceError> for CliError {
    fn from(e: SourceError) -> Self {
        CliError::Source(e)
    }
}

impl From<ProjectionUnavailable> for CliError {
    fn from(e: ProjectionUnavailable) -> Self {
        CliError::Projection(e)
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::Cache(e)
    }
}
