//! Built-in projections and registry.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

use super::{EastNorth, LatLon, LatLonBounds, Projection, ProjectionRegistry};

/// WGS84 semi-major axis in meters.
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// Latitude limit of the square Web Mercator world.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Spherical Web Mercator (`EPSG:3857`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl Projection for WebMercator {
    fn code(&self) -> &str {
        "EPSG:3857"
    }

    fn meters_per_unit(&self) -> f64 {
        1.0
    }

    fn lat_lon_to_east_north(&self, lat_lon: LatLon) -> EastNorth {
        let lat = lat_lon.lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
        let east = WGS84_SEMI_MAJOR_AXIS * lat_lon.lon.to_radians();
        let north = WGS84_SEMI_MAJOR_AXIS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
        EastNorth::new(east, north)
    }

    fn east_north_to_lat_lon(&self, east_north: EastNorth) -> LatLon {
        let lon = (east_north.east / WGS84_SEMI_MAJOR_AXIS).to_degrees();
        let lat = (2.0 * (east_north.north / WGS84_SEMI_MAJOR_AXIS).exp().atan() - PI / 2.0)
            .to_degrees();
        LatLon::new(lat, lon)
    }

    fn world_bounds(&self) -> LatLonBounds {
        LatLonBounds {
            min: LatLon::new(-MERCATOR_MAX_LAT, -180.0),
            max: LatLon::new(MERCATOR_MAX_LAT, 180.0),
        }
    }
}

/// Plate carrée in degrees. Easting is longitude, northing is latitude.
///
/// `EPSG:4326` declares latitude first, `CRS:84` longitude first; the
/// difference only shows up in [`Projection::switch_xy`].
#[derive(Debug, Clone)]
pub struct Geographic {
    code: String,
    lat_first: bool,
}

impl Geographic {
    pub fn epsg4326() -> Self {
        Self {
            code: "EPSG:4326".to_string(),
            lat_first: true,
        }
    }

    pub fn crs84() -> Self {
        Self {
            code: "CRS:84".to_string(),
            lat_first: false,
        }
    }
}

impl Projection for Geographic {
    fn code(&self) -> &str {
        &self.code
    }

    fn meters_per_unit(&self) -> f64 {
        2.0 * PI * WGS84_SEMI_MAJOR_AXIS / 360.0
    }

    fn switch_xy(&self) -> bool {
        self.lat_first
    }

    fn lat_lon_to_east_north(&self, lat_lon: LatLon) -> EastNorth {
        EastNorth::new(lat_lon.lon, lat_lon.lat)
    }

    fn east_north_to_lat_lon(&self, east_north: EastNorth) -> LatLon {
        LatLon::new(east_north.north, east_north.east)
    }

    fn world_bounds(&self) -> LatLonBounds {
        LatLonBounds {
            min: LatLon::new(-90.0, -180.0),
            max: LatLon::new(90.0, 180.0),
        }
    }
}

/// Registry of the projections bundled with the crate, keyed by
/// upper-cased CRS code (aliases included).
///
/// # Example
///
/// ```
/// use orthotile::projection::{BuiltinRegistry, ProjectionRegistry};
///
/// let registry = BuiltinRegistry::new();
/// assert_eq!(registry.by_code("epsg:900913").unwrap().code(), "EPSG:3857");
/// assert!(registry.by_code("EPSG:2180").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct BuiltinRegistry {
    projections: HashMap<String, Arc<dyn Projection>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mercator: Arc<dyn Projection> = Arc::new(WebMercator);
        let wgs84: Arc<dyn Projection> = Arc::new(Geographic::epsg4326());
        let crs84: Arc<dyn Projection> = Arc::new(Geographic::crs84());

        let mut projections = HashMap::new();
        for alias in ["EPSG:3857", "EPSG:900913", "EPSG:3785", "EPSG:102100", "OSGEO:41001"] {
            projections.insert(alias.to_string(), Arc::clone(&mercator));
        }
        projections.insert("EPSG:4326".to_string(), wgs84);
        for alias in ["CRS:84", "OGC:CRS84"] {
            projections.insert(alias.to_string(), Arc::clone(&crs84));
        }

        Self { projections }
    }

    /// Registers an additional projection under `code`.
    pub fn with_projection(mut self, code: &str, projection: Arc<dyn Projection>) -> Self {
        self.projections.insert(code.to_uppercase(), projection);
        self
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectionRegistry for BuiltinRegistry {
    fn by_code(&self, code: &str) -> Option<Arc<dyn Projection>> {
        self.projections.get(&code.trim().to_uppercase()).cloned()
    }
}
