//! Conversions between geographic, projected and tile-grid coordinates.
//!
//! A [`CoordinateTransform`] binds one [`TileMatrixSet`] to the
//! [`Projection`] of its CRS and precomputes the span of one tile, in
//! projected units, for every zoom level:
//!
//! ```text
//! crs_scale(z) = tile_size(z) * 0.28mm / meters_per_unit
//! scale(z)     = scale_denominator(z) * crs_scale(z)
//! ```
//!
//! Tile rows grow southwards from the matrix's top-left corner, so the
//! north component decreases as `y` increases.

use std::sync::Arc;

use crate::projection::{EastNorth, LatLon, Projection, ProjectionBounds};

use super::model::TileMatrixSet;

/// Nominal pixel size (meters) of the well-known scale sets.
pub const STANDARD_PIXEL_SIZE: f64 = 0.28e-3;

/// Relative tolerance applied when deciding which tile contains a point.
pub const TILE_CONTAINMENT_TOLERANCE: f64 = 1e-7;

/// Fractional tile-grid position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePosition {
    pub x: f64,
    pub y: f64,
}

/// Scale table and coordinate conversions for one tile matrix set.
#[derive(Debug, Clone)]
pub struct CoordinateTransform {
    matrix_set: Arc<TileMatrixSet>,
    projection: Arc<dyn Projection>,
    scales: Vec<f64>,
}

impl CoordinateTransform {
    /// Builds the transform and its per-zoom scale table.
    pub fn new(matrix_set: Arc<TileMatrixSet>, projection: Arc<dyn Projection>) -> Self {
        let meters_per_unit = projection.meters_per_unit();
        let scales = matrix_set
            .matrices()
            .iter()
            .map(|m| {
                let crs_scale = f64::from(m.tile_size()) * STANDARD_PIXEL_SIZE / meters_per_unit;
                m.scale_denominator() * crs_scale
            })
            .collect();

        Self {
            matrix_set,
            projection,
            scales,
        }
    }

    pub fn matrix_set(&self) -> &Arc<TileMatrixSet> {
        &self.matrix_set
    }

    pub fn projection(&self) -> &Arc<dyn Projection> {
        &self.projection
    }

    pub fn max_zoom(&self) -> u8 {
        self.matrix_set.max_zoom()
    }

    /// Span of one tile at `zoom`, in projected units.
    #[inline]
    pub fn scale(&self, zoom: u8) -> Option<f64> {
        self.scales.get(usize::from(zoom)).copied()
    }

    /// Tile edge length in pixels at `zoom`.
    pub fn tile_size(&self, zoom: u8) -> Option<u32> {
        self.matrix_set.matrix(zoom).map(|m| m.tile_size())
    }

    /// Resolution at `zoom`, in pixels per projected unit.
    pub fn pixels_per_unit(&self, zoom: u8) -> Option<f64> {
        let scale = self.scale(zoom)?;
        let size = self.tile_size(zoom)?;
        Some(f64::from(size) / scale)
    }

    /// Zoom level whose resolution is closest to `pixels_per_unit`,
    /// compared on a log scale.
    pub fn closest_zoom(&self, pixels_per_unit: f64) -> u8 {
        let target = pixels_per_unit.ln();
        (0..=self.max_zoom())
            .filter_map(|z| self.pixels_per_unit(z).map(|ppu| (z, (ppu.ln() - target).abs())))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(z, _)| z)
            .unwrap_or(0)
    }

    /// Projected position of the top-left corner of tile `(x, y)`.
    ///
    /// Accepts fractional positions so callers can address points inside
    /// a tile.
    #[inline]
    pub fn tile_to_projected(&self, x: f64, y: f64, zoom: u8) -> Option<EastNorth> {
        let scale = self.scale(zoom)?;
        let origin = self.matrix_set.matrix(zoom)?.top_left_corner();
        Some(EastNorth::new(
            origin.east + x * scale,
            origin.north - y * scale,
        ))
    }

    /// Fractional tile position of a projected point.
    #[inline]
    pub fn projected_to_tile(&self, point: EastNorth, zoom: u8) -> Option<TilePosition> {
        let scale = self.scale(zoom)?;
        let origin = self.matrix_set.matrix(zoom)?.top_left_corner();
        Some(TilePosition {
            x: (point.east - origin.east) / scale,
            y: (origin.north - point.north) / scale,
        })
    }

    /// Integer tile containing `point`.
    ///
    /// Positions within [`TILE_CONTAINMENT_TOLERANCE`] of the next tile edge
    /// are treated as lying on it.
    pub fn tile_containing(&self, point: EastNorth, zoom: u8) -> Option<(i64, i64)> {
        let pos = self.projected_to_tile(point, zoom)?;
        Some((floor_tolerant(pos.x), floor_tolerant(pos.y)))
    }

    /// Projected bounds of tile `(x, y)`.
    pub fn tile_bounds(&self, x: u32, y: u32, zoom: u8) -> Option<ProjectionBounds> {
        let top_left = self.tile_to_projected(f64::from(x), f64::from(y), zoom)?;
        let bottom_right = self.tile_to_projected(f64::from(x) + 1.0, f64::from(y) + 1.0, zoom)?;
        Some(ProjectionBounds::new(top_left, bottom_right))
    }

    /// Number of tile columns at `zoom`.
    ///
    /// Uses the declared matrix width when the server gave one, otherwise
    /// derives it from the projection's world bounds.
    pub fn tile_x_max(&self, zoom: u8) -> Option<u32> {
        let matrix = self.matrix_set.matrix(zoom)?;
        if let Some(width) = matrix.matrix_width() {
            return Some(width);
        }
        let scale = self.scale(zoom)?;
        let world_max = self.world_max();
        let span = (world_max.east - matrix.top_left_corner().east).abs();
        Some(tiles_spanning(span, scale))
    }

    /// Number of tile rows at `zoom`. See [`tile_x_max`](Self::tile_x_max).
    pub fn tile_y_max(&self, zoom: u8) -> Option<u32> {
        let matrix = self.matrix_set.matrix(zoom)?;
        if let Some(height) = matrix.matrix_height() {
            return Some(height);
        }
        let scale = self.scale(zoom)?;
        let world_min = self
            .projection
            .lat_lon_to_east_north(self.projection.world_bounds().min);
        let span = (matrix.top_left_corner().north - world_min.north).abs();
        Some(tiles_spanning(span, scale))
    }

    /// True if `(x, y)` lies inside the grid extent at `zoom`.
    pub fn contains_tile(&self, x: u32, y: u32, zoom: u8) -> bool {
        match (self.tile_x_max(zoom), self.tile_y_max(zoom)) {
            (Some(x_max), Some(y_max)) => x < x_max && y < y_max,
            _ => false,
        }
    }

    pub fn lat_lon_to_tile(&self, lat_lon: LatLon, zoom: u8) -> Option<TilePosition> {
        let point = self.projection.lat_lon_to_east_north(lat_lon);
        self.projected_to_tile(point, zoom)
    }

    pub fn tile_to_lat_lon(&self, x: f64, y: f64, zoom: u8) -> Option<LatLon> {
        let point = self.tile_to_projected(x, y, zoom)?;
        Some(self.projection.east_north_to_lat_lon(point))
    }

    fn world_max(&self) -> EastNorth {
        self.projection
            .lat_lon_to_east_north(self.projection.world_bounds().max)
    }
}

fn floor_tolerant(value: f64) -> i64 {
    let nudge = TILE_CONTAINMENT_TOLERANCE * value.abs().max(1.0);
    (value + nudge).floor() as i64
}

fn tiles_spanning(span: f64, scale: f64) -> u32 {
    let exact = span / scale;
    let tiles = (exact - TILE_CONTAINMENT_TOLERANCE * exact.max(1.0)).ceil();
    if tiles >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        tiles.max(0.0) as u32
    }
}
