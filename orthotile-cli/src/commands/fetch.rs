//! Fetch command - load one tile through the cache and save it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ValueEnum;
use orthotile::address::SourceKind;
use orthotile::fetch::{ReqwestHttpClient, TileOutcome};
use orthotile::grid::select_layer;
use orthotile::projection::LatLon;
use orthotile::source::{SourceError, TemplatedTileSource, TileSource, WmtsOptions, WmtsTileSource};
use tracing::info;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Zoom levels offered by WMS and TMS sources unless overridden.
pub const DEFAULT_TEMPLATE_MAX_ZOOM: u8 = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceType {
    /// WMTS server, URL points at its capabilities document
    Wmts,
    /// WMS URL template with {bbox}, {width}, {height} tokens
    Wms,
    /// TMS URL template with {z}, {x}, {y} tokens
    Tms,
}

impl From<SourceType> for SourceKind {
    fn from(value: SourceType) -> Self {
        match value {
            SourceType::Wmts => SourceKind::Wmts,
            SourceType::Wms => SourceKind::Wms,
            SourceType::Tms => SourceKind::Tms,
        }
    }
}

/// Arguments for the fetch command.
pub struct FetchArgs {
    pub url: Option<String>,
    pub source: SourceType,
    pub layer: Option<String>,
    pub projection: Option<String>,
    pub zoom: u8,
    pub x: Option<u32>,
    pub y: Option<u32>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub max_zoom: u8,
    pub output: PathBuf,
}

/// Which tile to fetch, by grid index or by location.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TileTarget {
    Grid { x: u32, y: u32 },
    Location(LatLon),
}

impl TileTarget {
    fn from_args(
        x: Option<u32>,
        y: Option<u32>,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> Result<Self, CliError> {
        match (x, y, lat, lon) {
            (Some(x), Some(y), None, None) => Ok(Self::Grid { x, y }),
            (None, None, Some(lat), Some(lon)) => Ok(Self::Location(LatLon::new(lat, lon))),
            _ => Err(CliError::Usage(
                "Give either --x and --y, or --lat and --lon".to_string(),
            )),
        }
    }

    fn resolve(self, source: &dyn TileSource, zoom: u8) -> Result<(u32, u32), CliError> {
        let location = match self {
            Self::Grid { x, y } => return Ok((x, y)),
            Self::Location(location) => location,
        };

        let transform = source
            .transform()
            .map_err(|e| CliError::Tile(e.to_string()))?;
        let position = transform
            .lat_lon_to_tile(location, zoom)
            .ok_or_else(|| CliError::Usage(format!("Zoom level {} is not offered", zoom)))?;

        let (x, y) = (position.x.floor(), position.y.floor());
        if x < 0.0 || y < 0.0 {
            return Err(CliError::Usage(format!(
                "{}, {} lies outside the tile grid",
                location.lat, location.lon
            )));
        }
        Ok((x as u32, y as u32))
    }
}

/// Run the fetch command.
pub async fn run(args: FetchArgs, config_path: Option<&Path>) -> Result<(), CliError> {
    let target = TileTarget::from_args(args.x, args.y, args.lat, args.lon)?;

    let runner = CliRunner::new(config_path)?;
    runner.log_startup("fetch");
    let config = runner.config();

    let url = args
        .url
        .clone()
        .or_else(|| config.imagery.url.clone())
        .ok_or_else(|| CliError::Usage("No imagery URL given and none configured".into()))?;
    let projection_code = args
        .projection
        .clone()
        .unwrap_or_else(|| config.imagery.projection.clone());

    let client = runner.client();
    let source: Arc<dyn TileSource> = match args.source {
        SourceType::Wmts => {
            let layer = args
                .layer
                .clone()
                .or_else(|| config.imagery.layer.clone())
                .ok_or_else(|| CliError::Usage("No layer given and none configured".into()))?;
            Arc::new(wmts_source(&runner, &client, &url, &layer, &projection_code).await?)
        }
        SourceType::Wms | SourceType::Tms => {
            let projection = runner
                .registry()
                .by_code(&projection_code)
                .ok_or_else(|| CliError::Usage(format!("Unknown projection {}", projection_code)))?;
            let store = runner.open_store(&url, config.cache.tile_size)?;
            Arc::new(TemplatedTileSource::new(
                args.source.into(),
                &url,
                projection,
                args.max_zoom,
                config.imagery.no_tile_policy(),
                store,
            )?)
        }
    };

    let (x, y) = target.resolve(source.as_ref(), args.zoom)?;
    println!("Fetching tile {}/{}/{} from {}", args.zoom, x, y, source.id());

    let dispatcher = runner.dispatcher(client);
    let outcome = dispatcher.fetch(Arc::clone(&source), x, y, args.zoom).await;
    source.cache().save_index()?;
    info!("{}", dispatcher.stats());

    match outcome {
        TileOutcome::Loaded { image, from_cache } => {
            image.save(&args.output).map_err(|error| CliError::ImageWrite {
                path: args.output.clone(),
                error,
            })?;
            println!(
                "Saved {}x{} tile to {}{}",
                image.width(),
                image.height(),
                args.output.display(),
                if from_cache { " (from cache)" } else { "" }
            );
            Ok(())
        }
        TileOutcome::NoTileAtZoom => {
            println!("The server has no imagery for this tile");
            Ok(())
        }
        TileOutcome::Failed { message, .. } => Err(CliError::Tile(message)),
        TileOutcome::Canceled => Err(CliError::Tile("request was canceled".to_string())),
    }
}

async fn wmts_source(
    runner: &CliRunner,
    client: &ReqwestHttpClient,
    url: &str,
    layer: &str,
    projection_code: &str,
) -> Result<WmtsTileSource, CliError> {
    let config = runner.config();
    let capabilities = runner.capabilities(client, url).await?;
    if capabilities.layers_named(layer).next().is_none() {
        return Err(SourceError::UnknownLayer(layer.to_string()).into());
    }

    // The store is sized before the source exists, from the binding it will pick.
    let matrix_set = config.imagery.matrix_set.clone();
    let selection = select_layer(
        &capabilities.layers,
        layer,
        matrix_set.as_deref(),
        projection_code,
        runner.registry().as_ref(),
    )?;
    let tile_size = selection
        .layer
        .tile_matrix_set
        .matrices()
        .first()
        .map(|m| m.tile_size())
        .unwrap_or(config.cache.tile_size);
    let store = runner.open_store(url, tile_size)?;

    let options = WmtsOptions {
        matrix_set,
        no_tile: config.imagery.no_tile_policy(),
        ..WmtsOptions::default()
    };
    let source = WmtsTileSource::new(
        Arc::new(capabilities),
        layer,
        options,
        Arc::clone(runner.registry()),
        store,
    )?;
    source.init_projection(projection_code)?;
    Ok(source)
}
