//! Orthotile CLI - command-line interface
//!
//! Inspects WMTS servers, fetches single tiles through the persistent
//! tile cache and maintains that cache.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use commands::cache::CacheAction;
use commands::fetch::{FetchArgs, SourceType, DEFAULT_TEMPLATE_MAX_ZOOM};
use error::CliError;

#[derive(Parser)]
#[command(name = "orthotile")]
#[command(version = orthotile::VERSION)]
#[command(about = "Fetch and cache imagery tiles from WMTS, WMS and TMS servers", long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.orthotile/config.ini
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the layers and tile matrix sets of a WMTS server
    Layers {
        /// Capabilities URL (default: imagery URL from config)
        url: Option<String>,
    },

    /// Fetch one tile, through the cache, and save it as an image
    Fetch {
        /// Capabilities URL or tile URL template (default: from config)
        url: Option<String>,

        /// Kind of server the URL points at
        #[arg(long, value_enum, default_value = "wmts")]
        source: SourceType,

        /// WMTS layer identifier (default: from config)
        #[arg(long)]
        layer: Option<String>,

        /// Projection code such as EPSG:3857 (default: from config)
        #[arg(long)]
        projection: Option<String>,

        /// Zoom level
        #[arg(long)]
        zoom: u8,

        /// Tile column
        #[arg(long)]
        x: Option<u32>,

        /// Tile row
        #[arg(long)]
        y: Option<u32>,

        /// Latitude in decimal degrees, instead of --x/--y
        #[arg(long)]
        lat: Option<f64>,

        /// Longitude in decimal degrees, instead of --x/--y
        #[arg(long)]
        lon: Option<f64>,

        /// Highest zoom level of WMS and TMS sources
        #[arg(long, default_value_t = DEFAULT_TEMPLATE_MAX_ZOOM)]
        max_zoom: u8,

        /// Output image path; the format follows the extension
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Tile cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result: Result<(), CliError> = match cli.command {
        Commands::Layers { url } => commands::layers::run(url, config_path).await,
        Commands::Fetch {
            url,
            source,
            layer,
            projection,
            zoom,
            x,
            y,
            lat,
            lon,
            max_zoom,
            output,
        } => {
            let args = FetchArgs {
                url,
                source,
                layer,
                projection,
                zoom,
                x,
                y,
                lat,
                lon,
                max_zoom,
                output,
            };
            commands::fetch::run(args, config_path).await
        }
        Commands::Cache { action } => commands::cache::run(action, config_path),
    };

    if let Err(e) = result {
        e.exit();
    }
}
