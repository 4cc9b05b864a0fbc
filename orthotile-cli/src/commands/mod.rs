//! CLI command implementations.
//!
//! # Command Modules
//!
//! - [`cache`] - Cache maintenance (stats, clean, evict)
//! - [`fetch`] - Fetch a single tile through the cache
//! - [`layers`] - List the layers of a WMTS server

pub mod cache;
pub mod fetch;
pub mod layers;
