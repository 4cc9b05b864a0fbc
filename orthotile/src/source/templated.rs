//! WMS and TMS sources addressed by a single URL template.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{SourceError, SourceSnapshot, TileSource};
use crate::address::{SourceKind, TileAddressBuilder};
use crate::cache::TileCacheStore;
use crate::capabilities::Layer;
use crate::fetch::{FetchError, NoTilePolicy};
use crate::grid::{
    CoordinateTransform, MatrixError, TileMatrix, TileMatrixSet, STANDARD_PIXEL_SIZE,
};
use crate::projection::{EastNorth, Projection};

/// Power-of-two pyramid covering the world of `projection`.
///
/// Zoom 0 is one tile spanning the shorter side of the projected world;
/// each deeper level halves the tile span. Matrix extents are left
/// undeclared and derived from the world bounds.
pub fn world_matrix_set(
    projection: &dyn Projection,
    tile_size: u32,
    max_zoom: u8,
) -> Result<TileMatrixSet, MatrixError> {
    let world = projection.world_bounds();
    let min = projection.lat_lon_to_east_north(world.min);
    let max = projection.lat_lon_to_east_north(world.max);
    let span = (max.east - min.east).abs().min((max.north - min.north).abs());
    let corner = EastNorth::new(min.east.min(max.east), min.north.max(max.north));
    let pixel_span = f64::from(tile_size) * STANDARD_PIXEL_SIZE;

    let matrices = (0..=max_zoom)
        .map(|zoom| {
            let scale = span / 2f64.powi(i32::from(zoom));
            let denominator = scale * projection.meters_per_unit() / pixel_span;
            TileMatrix::new(zoom.to_string(), denominator, corner, false, tile_size, tile_size)
        })
        .collect::<Result<Vec<_>, _>>()?;

    TileMatrixSet::new(
        format!("{}-{}", projection.cache_directory_name(), tile_size),
        projection.code(),
        matrices,
    )
}

/// A WMS or TMS server addressed by one URL template.
pub struct TemplatedTileSource {
    id: String,
    builder: TileAddressBuilder,
    snapshot: SourceSnapshot,
    no_tile: NoTilePolicy,
    cache: Arc<TileCacheStore>,
}

impl fmt::Debug for TemplatedTileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplatedTileSource")
            .field("id", &self.id)
            .field("kind", &self.builder.kind())
            .field("projection", &self.snapshot.transform.projection().code())
            .finish_non_exhaustive()
    }
}

impl TemplatedTileSource {
    /// Creates a source from a URL template.
    ///
    /// Tiles use the cache's tile size. Zoom levels run from 0 to
    /// `max_zoom` on a [`world_matrix_set`] in `projection`.
    ///
    /// # Errors
    ///
    /// [`SourceError::Address`] when a WMS template uses unknown tokens.
    pub fn new(
        kind: SourceKind,
        template: &str,
        projection: Arc<dyn Projection>,
        max_zoom: u8,
        no_tile: NoTilePolicy,
        cache: Arc<TileCacheStore>,
    ) -> Result<Self, SourceError> {
        let builder = TileAddressBuilder::templated(kind, template)?;
        let matrix_set = Arc::new(world_matrix_set(
            projection.as_ref(),
            cache.tile_size(),
            max_zoom,
        )?);
        let id = format!("{}:{}", kind.to_string().to_ascii_lowercase(), template);

        debug!(
            source = %id,
            projection = projection.code(),
            max_zoom,
            "Created templated tile source"
        );

        let layer = Layer {
            identifier: id.clone(),
            title: id.clone(),
            format: "image/png".to_string(),
            style: String::new(),
            rest_template: None,
            tile_matrix_set: Arc::clone(&matrix_set),
            dimensions: Vec::new(),
        };

        Ok(Self {
            id,
            builder,
            snapshot: SourceSnapshot::new(
                Arc::new(layer),
                Arc::new(CoordinateTransform::new(matrix_set, projection)),
            ),
            no_tile,
            cache,
        })
    }
}

impl TileSource for TemplatedTileSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        self.builder.kind()
    }

    fn snapshot(&self) -> Result<SourceSnapshot, FetchError> {
        Ok(self.snapshot.clone())
    }

    fn address_builder(&self) -> &TileAddressBuilder {
        &self.builder
    }

    fn no_tile_policy(&self) -> &NoTilePolicy {
        &self.no_tile
    }

    fn cache(&self) -> &Arc<TileCacheStore> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use crate::projection::{Geographic, WebMercator};
    use tempfile::TempDir;

    const HALF_WORLD: f64 = 20_037_508.342_789_244;

    fn cache(dir: &TempDir) -> Arc<TileCacheStore> {
        Arc::new(TileCacheStore::open(dir.path(), CacheOptions::new(256)).unwrap())
    }

    #[test]
    fn test_mercator_pyramid() {
        let set = world_matrix_set(&WebMercator, 256, 3).unwrap();
        let transform = CoordinateTransform::new(Arc::new(set), Arc::new(WebMercator));

        assert_eq!(transform.max_zoom(), 3);
        assert!((transform.scale(0).unwrap() - 2.0 * HALF_WORLD).abs() < 1e-3);
        assert!((transform.scale(3).unwrap() - 2.0 * HALF_WORLD / 8.0).abs() < 1e-3);
        assert_eq!(transform.tile_x_max(2), Some(4));
        assert_eq!(transform.tile_y_max(2), Some(4));
    }

    #[test]
    fn test_geographic_pyramid_is_two_by_one() {
        let projection = Geographic::epsg4326();
        let set = world_matrix_set(&projection, 256, 1).unwrap();
        assert_eq!(set.crs(), "EPSG:4326");

        let transform = CoordinateTransform::new(Arc::new(set), Arc::new(projection));
        assert!((transform.scale(0).unwrap() - 180.0).abs() < 1e-9);
        assert_eq!(transform.tile_x_max(0), Some(2));
        assert_eq!(transform.tile_y_max(0), Some(1));
        assert_eq!(transform.tile_x_max(1), Some(4));
    }

    #[test]
    fn test_tms_address() {
        let dir = TempDir::new().unwrap();
        let source = TemplatedTileSource::new(
            SourceKind::Tms,
            "https://tile.example.org/{zoom}/{x}/{y}.png",
            Arc::new(WebMercator),
            19,
            NoTilePolicy::default(),
            cache(&dir),
        )
        .unwrap();

        assert_eq!(source.kind(), SourceKind::Tms);
        assert_eq!(
            source.tile_address(3, 5, 4).unwrap().url,
            "https://tile.example.org/4/3/5.png"
        );
        assert!(source.tile_address(16, 0, 4).is_err());
        assert!(matches!(
            source.tile_address(0, 0, 20),
            Err(FetchError::Address(_))
        ));
    }

    #[test]
    fn test_wms_bbox_matches_tile_bounds() {
        let dir = TempDir::new().unwrap();
        let source = TemplatedTileSource::new(
            SourceKind::Wms,
            "https://wms.example.org/?SRS={proj}&BBOX={bbox}&WIDTH={width}&HEIGHT={height}",
            Arc::new(WebMercator),
            10,
            NoTilePolicy::default(),
            cache(&dir),
        )
        .unwrap();

        let url = source.tile_address(0, 0, 1).unwrap().url;
        assert!(url.starts_with("https://wms.example.org/?SRS=EPSG:3857&BBOX="));
        assert!(url.contains("BBOX=-20037508.3427892,"));
        assert!(url.contains(",20037508.3427892&WIDTH"));
        assert!(url.ends_with("&WIDTH=256&HEIGHT=256"));
    }

    #[test]
    fn test_wms_unknown_token_rejected() {
        let dir = TempDir::new().unwrap();
        let err = TemplatedTileSource::new(
            SourceKind::Wms,
            "https://wms.example.org/?BBOX={bbox}&X={x}",
            Arc::new(WebMercator),
            10,
            NoTilePolicy::default(),
            cache(&dir),
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::Address(_)));
    }

    #[test]
    fn test_cache_key_matches_tile_origin() {
        let dir = TempDir::new().unwrap();
        let source = TemplatedTileSource::new(
            SourceKind::Tms,
            "https://tile.example.org/{z}/{x}/{y}.png",
            Arc::new(WebMercator),
            5,
            NoTilePolicy::default(),
            cache(&dir),
        )
        .unwrap();

        let key = source.cache_key(1, 1, 1).unwrap();
        assert!(key.east.abs() < 1e-3);
        assert!((key.north + HALF_WORLD).abs() < 1e-3);
        assert_eq!(key.projection.code(), "EPSG:3857");
    }
}
