//! Orthotile - imagery tile sources for map viewers
//!
//! This library reads WMTS capability documents, converts between
//! geographic, projected and tile-grid coordinates, addresses and fetches
//! tiles from WMTS, WMS and TMS servers, and keeps them in a persistent
//! cache that can compose approximate tiles from neighbouring zoom levels.
//!
//! # Overview
//!
//! ```ignore
//! use std::sync::Arc;
//! use orthotile::capabilities::load_capabilities;
//! use orthotile::fetch::{DispatcherConfig, FetchDispatcher, ReqwestHttpClient};
//! use orthotile::source::{WmtsOptions, WmtsTileSource};
//!
//! let client = ReqwestHttpClient::default();
//! let capabilities = load_capabilities(&client, url, timeouts, None, &registry).await?;
//! let source = WmtsTileSource::new(Arc::new(capabilities), "ortho", WmtsOptions::default(), registry, cache)?;
//! source.init_projection("EPSG:3857")?;
//!
//! let dispatcher = FetchDispatcher::new(client, DispatcherConfig::default());
//! let outcome = dispatcher.fetch(Arc::new(source), x, y, zoom).await;
//! ```

pub mod address;
pub mod cache;
pub mod capabilities;
pub mod config;
pub mod fetch;
pub mod grid;
pub mod imaging;
pub mod logging;
pub mod projection;
pub mod source;

/// Version of the Orthotile library and CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
