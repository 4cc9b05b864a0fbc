//! Cache management CLI commands.

use std::path::Path;

use clap::Subcommand;
use orthotile::cache::MaintenanceReport;
use orthotile::config::{format_size, Size};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show statistics for every cached source
    Stats,
    /// Delete tiles at or below a size threshold.
    ///
    /// Servers often answer areas without imagery with tiny blank images;
    /// removing them lets those tiles be fetched again.
    Clean {
        /// Size threshold such as "512B" or "2KB" (default: from config)
        #[arg(long)]
        threshold: Option<Size>,
    },
    /// Delete the least recently used tiles until each source fits its limit
    Evict {
        /// Disk limit per source such as "500MB" (default: from config)
        #[arg(long)]
        max_size: Option<Size>,
    },
}

/// Run a cache subcommand.
pub fn run(action: CacheAction, config_path: Option<&Path>) -> Result<(), CliError> {
    let runner = CliRunner::new(config_path)?;
    runner.log_startup("cache");

    let directories = runner.source_directories();
    let sources = directories.sources()?;
    println!("Tile cache: {}", directories.root().display());
    if sources.is_empty() {
        println!("  No cached sources.");
        return Ok(());
    }

    let mut total = MaintenanceReport::default();
    for (url, directory) in sources {
        let store = runner.open_existing_store(&directory)?;
        println!();
        println!("{}", url);
        println!("  Directory: {} ({}px tiles)", directory.display(), store.tile_size());

        match &action {
            CacheAction::Stats => {
                for line in store.stats().to_string().lines() {
                    println!("  {}", line);
                }
            }
            CacheAction::Clean { threshold } => {
                let threshold = threshold
                    .map(Size::bytes)
                    .unwrap_or(runner.config().cache.small_file_threshold);
                let report = store.clean_small_files(threshold);
                store.save_index()?;
                print_report(&report);
                accumulate(&mut total, &report);
            }
            CacheAction::Evict { max_size } => {
                let limit = max_size
                    .map(Size::bytes)
                    .unwrap_or(runner.config().cache.max_size);
                let report = store.evict_to_limit(limit)?;
                store.save_index()?;
                print_report(&report);
                accumulate(&mut total, &report);
            }
        }
    }

    if !matches!(action, CacheAction::Stats) {
        println!();
        println!(
            "Total: {} files deleted, {} freed",
            total.files_deleted,
            format_size(total.bytes_freed)
        );
    }
    Ok(())
}

fn print_report(report: &MaintenanceReport) {
    println!(
        "  Removed {} entries, deleted {} files, freed {}",
        report.entries_removed,
        report.files_deleted,
        format_size(report.bytes_freed)
    );
}

fn accumulate(total: &mut MaintenanceReport, report: &MaintenanceReport) {
    total.entries_removed += report.entries_removed;
    total.files_deleted += report.files_deleted;
    total.bytes_freed += report.bytes_freed;
}
