//! Projection collaborator interface.
//!
//! The tile-source subsystem never implements map projections on its own
//! terms: every geographic ↔ projected conversion goes through the
//! [`Projection`] trait, and CRS codes found in capability documents are
//! resolved through a [`ProjectionRegistry`].
//!
//! Two projections ship with the crate so sources work out of the box:
//! spherical Web Mercator (`EPSG:3857`) and geographic WGS84
//! (`EPSG:4326` with latitude-first axis order, `CRS:84` with longitude-first).

mod builtin;

pub use builtin::{BuiltinRegistry, Geographic, WebMercator, WGS84_SEMI_MAJOR_AXIS};

use std::fmt;
use std::sync::Arc;

/// A point in projected coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EastNorth {
    pub east: f64,
    pub north: f64,
}

impl EastNorth {
    pub fn new(east: f64, north: f64) -> Self {
        Self { east, north }
    }

    /// Returns the point with its two components exchanged.
    pub fn swapped(self) -> Self {
        Self {
            east: self.north,
            north: self.east,
        }
    }
}

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to `other` in meters (haversine on the WGS84
    /// semi-major axis).
    pub fn distance_to(&self, other: &LatLon) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let d_lat = lat2 - lat1;
        let d_lon = (other.lon - self.lon).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * WGS84_SEMI_MAJOR_AXIS * a.sqrt().min(1.0).asin()
    }
}

/// Axis-aligned rectangle in projected coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionBounds {
    pub min_east: f64,
    pub min_north: f64,
    pub max_east: f64,
    pub max_north: f64,
}

impl ProjectionBounds {
    /// Creates bounds from two corners in any order.
    pub fn new(a: EastNorth, b: EastNorth) -> Self {
        Self {
            min_east: a.east.min(b.east),
            min_north: a.north.min(b.north),
            max_east: a.east.max(b.east),
            max_north: a.north.max(b.north),
        }
    }

    pub fn min(&self) -> EastNorth {
        EastNorth::new(self.min_east, self.min_north)
    }

    pub fn max(&self) -> EastNorth {
        EastNorth::new(self.max_east, self.max_north)
    }

    pub fn width(&self) -> f64 {
        self.max_east - self.min_east
    }

    pub fn height(&self) -> f64 {
        self.max_north - self.min_north
    }

    /// True if the two rectangles overlap. Touching edges count.
    pub fn intersects(&self, other: &ProjectionBounds) -> bool {
        self.min_east <= other.max_east
            && other.min_east <= self.max_east
            && self.min_north <= other.max_north
            && other.min_north <= self.max_north
    }

    pub fn contains(&self, point: EastNorth) -> bool {
        (self.min_east..=self.max_east).contains(&point.east)
            && (self.min_north..=self.max_north).contains(&point.north)
    }

    /// Returns the rectangle moved inwards by `margin` on every side.
    pub fn shrink(&self, margin: f64) -> Self {
        Self {
            min_east: self.min_east + margin,
            min_north: self.min_north + margin,
            max_east: self.max_east - margin,
            max_north: self.max_north - margin,
        }
    }
}

/// Geographic extent of a projection's valid area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLonBounds {
    pub min: LatLon,
    pub max: LatLon,
}

/// A map projection supplied by the host application.
pub trait Projection: Send + Sync + fmt::Debug {
    /// Canonical CRS code, e.g. `EPSG:3857`.
    fn code(&self) -> &str;

    /// Name of the cache subdirectory holding tiles in this projection.
    fn cache_directory_name(&self) -> String {
        self.code().replace(':', "_").to_lowercase()
    }

    /// Length of one projected unit in meters.
    fn meters_per_unit(&self) -> f64;

    /// True when the CRS declares northing before easting (lat/lon order).
    fn switch_xy(&self) -> bool {
        false
    }

    fn lat_lon_to_east_north(&self, lat_lon: LatLon) -> EastNorth;

    fn east_north_to_lat_lon(&self, east_north: EastNorth) -> LatLon;

    /// Area of the world this projection can represent.
    fn world_bounds(&self) -> LatLonBounds;
}

/// Resolves CRS codes to projections.
pub trait ProjectionRegistry: Send + Sync {
    fn by_code(&self, code: &str) -> Option<Arc<dyn Projection>>;
}
