//! Tile sources: what the dispatcher needs to know about a server.
//!
//! A [`TileSource`] turns tile coordinates into a cache key and a request
//! address, tells which responses mean "no tile", and owns the cache its
//! tiles are stored in. Both the key and the address of one fetch come
//! from a single [`SourceSnapshot`], so a source that switches projection
//! mid-fetch never mixes two grids. [`WmtsTileSource`] is driven by a capabilities
//! document; [`TemplatedTileSource`] by a single WMS or TMS URL template.

mod templated;
mod wmts;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::address::{AddressError, SourceKind, TileAddress, TileAddressBuilder};
use crate::cache::{CacheError, TileCacheStore};
use crate::capabilities::{CapabilitiesError, Layer};
use crate::fetch::{FetchError, NoTilePolicy};
use crate::grid::{CoordinateTransform, MatrixError};
use crate::projection::Projection;

pub use templated::{world_matrix_set, TemplatedTileSource};
pub use wmts::{WmtsOptions, WmtsTileSource};

/// Errors constructing a source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Layer '{0}' not found in capabilities")]
    UnknownLayer(String),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Capabilities(#[from] CapabilitiesError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// One tile of one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileRequest {
    pub source: String,
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileRequest {
    pub fn new(source: impl Into<String>, x: u32, y: u32, zoom: u8) -> Self {
        Self {
            source: source.into(),
            x,
            y,
            zoom,
        }
    }

    /// Key under which concurrent requests for this tile are merged.
    ///
    /// `grid` names the projection and matrix set the tile is fetched in,
    /// see [`SourceSnapshot::grid_id`].
    pub fn dedup_key(&self, grid: &str) -> String {
        format!("{}/{}/{}/{}/{}", self.source, grid, self.zoom, self.x, self.y)
    }
}

impl fmt::Display for TileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.source, self.zoom, self.x, self.y)
    }
}

/// Where a tile lives in the cache: projection, scale and south-west origin.
#[derive(Debug, Clone)]
pub struct CacheKey {
    pub projection: Arc<dyn Projection>,
    pub pixels_per_unit: f64,
    pub east: f64,
    pub north: f64,
}

/// Layer binding and grid of a source at one moment.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub layer: Arc<Layer>,
    pub transform: Arc<CoordinateTransform>,
}

impl SourceSnapshot {
    pub fn new(layer: Arc<Layer>, transform: Arc<CoordinateTransform>) -> Self {
        Self { layer, transform }
    }

    /// Projection code and matrix set, such as `EPSG:3857/google`.
    pub fn grid_id(&self) -> String {
        format!(
            "{}/{}",
            self.transform.projection().code(),
            self.transform.matrix_set().identifier()
        )
    }

    /// Cache key of a tile: its south-west corner and scale.
    pub fn cache_key(&self, x: u32, y: u32, zoom: u8) -> Result<CacheKey, AddressError> {
        let transform = &self.transform;
        let out_of_range = || AddressError::OutOfRange {
            x,
            y,
            zoom,
            x_max: transform.tile_x_max(zoom).unwrap_or(0),
            y_max: transform.tile_y_max(zoom).unwrap_or(0),
        };
        let bounds = transform.tile_bounds(x, y, zoom).ok_or_else(out_of_range)?;
        let pixels_per_unit = transform.pixels_per_unit(zoom).ok_or_else(out_of_range)?;
        let origin = bounds.min();
        Ok(CacheKey {
            projection: Arc::clone(transform.projection()),
            pixels_per_unit,
            east: origin.east,
            north: origin.north,
        })
    }
}

/// Everything one fetch needs, derived from a single snapshot.
#[derive(Debug, Clone)]
pub struct TilePlan {
    pub grid: String,
    pub key: CacheKey,
    pub address: TileAddress,
    pub tile_size: u32,
}

/// A server the dispatcher can fetch tiles from.
pub trait TileSource: Send + Sync + fmt::Debug {
    /// Stable identifier, unique among sources sharing a dispatcher.
    fn id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Layer and grid currently in use.
    fn snapshot(&self) -> Result<SourceSnapshot, FetchError>;

    fn address_builder(&self) -> &TileAddressBuilder;

    fn no_tile_policy(&self) -> &NoTilePolicy;

    fn cache(&self) -> &Arc<TileCacheStore>;

    fn request(&self, x: u32, y: u32, zoom: u8) -> TileRequest {
        TileRequest::new(self.id(), x, y, zoom)
    }

    /// Grid and projection currently in use.
    fn transform(&self) -> Result<Arc<CoordinateTransform>, FetchError> {
        Ok(self.snapshot()?.transform)
    }

    /// Pixel size of tiles at `zoom`, falling back to the cache tile size.
    fn tile_size(&self, zoom: u8) -> u32 {
        self.transform()
            .ok()
            .and_then(|t| t.tile_size(zoom))
            .unwrap_or_else(|| self.cache().tile_size())
    }

    fn tile_address(&self, x: u32, y: u32, zoom: u8) -> Result<TileAddress, FetchError> {
        Ok(self.plan(x, y, zoom)?.address)
    }

    fn cache_key(&self, x: u32, y: u32, zoom: u8) -> Result<CacheKey, FetchError> {
        Ok(self.snapshot()?.cache_key(x, y, zoom)?)
    }

    /// Cache key and address of a tile, both from one snapshot.
    fn plan(&self, x: u32, y: u32, zoom: u8) -> Result<TilePlan, FetchError> {
        let snapshot = self.snapshot()?;
        let key = snapshot.cache_key(x, y, zoom)?;
        let address = self.address_builder().build_url(
            &snapshot.layer,
            &snapshot.transform,
            x,
            y,
            zoom,
        )?;
        Ok(TilePlan {
            grid: snapshot.grid_id(),
            key,
            address,
            tile_size: snapshot
                .transform
                .tile_size(zoom)
                .unwrap_or_else(|| self.cache().tile_size()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_format() {
        let request = TileRequest::new("ortho", 3, 5, 7);
        assert_eq!(
            request.dedup_key("EPSG:3857/google"),
            "ortho/EPSG:3857/google/7/3/5"
        );
        assert_eq!(request.to_string(), "ortho/7/3/5");
    }

    #[test]
    fn test_distinct_tiles_distinct_keys() {
        let a = TileRequest::new("s", 1, 12, 3).dedup_key("g");
        let b = TileRequest::new("s", 11, 2, 3).dedup_key("g");
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_tile_in_other_grid_distinct_keys() {
        let request = TileRequest::new("s", 0, 0, 0);
        assert_ne!(
            request.dedup_key("EPSG:3857/google"),
            request.dedup_key("EPSG:4326/wgs")
        );
    }
}
