//! CLI runner for common setup and operations.
//!
//! Loads the configuration, starts logging and builds the shared pieces
//! commands need: HTTP client, projection registry, tile stores.

use std::path::Path;
use std::sync::Arc;

use orthotile::cache::{CacheOptions, SourceDirectories, TileCacheStore};
use orthotile::capabilities::{load_capabilities, Capabilities, CapabilitiesCache};
use orthotile::config::ConfigFile;
use orthotile::fetch::{DispatcherConfig, FetchDispatcher, ReqwestHttpClient};
use orthotile::logging::{init_logging, LoggingGuard};
use orthotile::projection::{BuiltinRegistry, ProjectionRegistry};
use tracing::info;

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    _logging_guard: LoggingGuard,
    config: ConfigFile,
    registry: Arc<dyn ProjectionRegistry>,
}

impl CliRunner {
    /// Load the config (from `config_path` or the default location) and
    /// start logging.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let config = match config_path {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load()?,
        };

        let logging_guard = init_logging(&config.logging.directory, &config.logging.file)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            _logging_guard: logging_guard,
            config,
            registry: Arc::new(BuiltinRegistry::new()),
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn ProjectionRegistry> {
        &self.registry
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("Orthotile v{}", orthotile::VERSION);
        info!("Orthotile CLI: {} command", command);
    }

    pub fn client(&self) -> ReqwestHttpClient {
        ReqwestHttpClient::new(self.config.network.user_agent.clone())
    }

    pub fn dispatcher(&self, client: ReqwestHttpClient) -> FetchDispatcher<ReqwestHttpClient> {
        FetchDispatcher::new(client, DispatcherConfig::from_settings(&self.config.network))
    }

    /// Fetch (or reuse a downloaded copy of) the capabilities at `url`.
    pub async fn capabilities(
        &self,
        client: &ReqwestHttpClient,
        url: &str,
    ) -> Result<Capabilities, CliError> {
        let documents = CapabilitiesCache::new(self.config.cache.directory.join("capabilities"));
        let capabilities = load_capabilities(
            client,
            url,
            self.config.network.timeouts(),
            Some(&documents),
            self.registry.as_ref(),
        )
        .await?;
        Ok(capabilities)
    }

    pub fn source_directories(&self) -> SourceDirectories {
        SourceDirectories::new(&self.config.cache.directory)
    }

    /// Open the tile store of the source at `url`.
    pub fn open_store(&self, url: &str, tile_size: u32) -> Result<Arc<TileCacheStore>, CliError> {
        let directory = self.source_directories().directory_for(url)?;
        let store = TileCacheStore::open(directory, self.store_options(tile_size))?;
        Ok(Arc::new(store))
    }

    /// Open an existing store with the tile size it was written with.
    pub fn open_existing_store(&self, directory: &Path) -> Result<TileCacheStore, CliError> {
        let tile_size = TileCacheStore::indexed_tile_size(directory)?
            .unwrap_or(self.config.cache.tile_size);
        Ok(TileCacheStore::open(directory, self.store_options(tile_size))?)
    }

    fn store_options(&self, tile_size: u32) -> CacheOptions {
        CacheOptions::new(tile_size)
            .with_memory_size(self.config.cache.memory_size)
            .with_tolerances(self.config.cache.tolerances())
            .with_max_size(self.config.cache.max_size)
    }
}
