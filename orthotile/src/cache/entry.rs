//! Index entries and cache file naming.

use std::collections::HashSet;

use crate::projection::{EastNorth, Projection, ProjectionBounds};

/// Default relative tolerance for exact-match comparisons.
pub const DEFAULT_MATCH_EPSILON: f64 = 1e-7;

/// Default scale window for partial matches (÷5 .. ×5).
pub const DEFAULT_SCALE_WINDOW: f64 = 5.0;

/// Default border shrink for partial matches, as a fraction of the tile span.
pub const DEFAULT_BORDER_RATIO: f64 = 0.01;

/// Tolerances used when matching cache entries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchTolerances {
    /// Relative tolerance for scale and origin comparisons.
    pub match_epsilon: f64,
    /// Partial matches accept scales within `[scale / window, scale * window]`.
    pub scale_window: f64,
    /// Fraction of the tile span trimmed from each edge before intersecting.
    pub border_ratio: f64,
}

impl Default for MatchTolerances {
    fn default() -> Self {
        Self {
            match_epsilon: DEFAULT_MATCH_EPSILON,
            scale_window: DEFAULT_SCALE_WINDOW,
            border_ratio: DEFAULT_BORDER_RATIO,
        }
    }
}

/// One cached tile (or no-tile marker) in one projection.
///
/// `east`/`north` is the south-west corner of the tile; `bounds` extends
/// one tile span (`tile_size / pixels_per_unit`) north-east from it.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub id: u64,
    pub pixels_per_unit: f64,
    pub east: f64,
    pub north: f64,
    pub bounds: ProjectionBounds,
    /// `None` marks a tile the server has no imagery for.
    pub filename: Option<String>,
    pub last_used: i64,
    pub last_modified: i64,
}

impl CacheEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        tile_size: u32,
        pixels_per_unit: f64,
        east: f64,
        north: f64,
        filename: Option<String>,
        last_used: i64,
        last_modified: i64,
    ) -> Self {
        let span = f64::from(tile_size) / pixels_per_unit;
        Self {
            id,
            pixels_per_unit,
            east,
            north,
            bounds: ProjectionBounds::new(
                EastNorth::new(east, north),
                EastNorth::new(east + span, north + span),
            ),
            filename,
            last_used,
            last_modified,
        }
    }

    pub fn is_no_tile(&self) -> bool {
        self.filename.is_none()
    }

    /// True if this entry is the tile at `(pixels_per_unit, east, north)`.
    pub fn matches(&self, pixels_per_unit: f64, east: f64, north: f64, epsilon: f64) -> bool {
        approx_eq(self.pixels_per_unit, pixels_per_unit, epsilon)
            && approx_eq(self.east, east, epsilon)
            && approx_eq(self.north, north, epsilon)
    }
}

/// Relative comparison, absolute near zero.
pub(crate) fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() <= epsilon * a.abs().max(b.abs()).max(1.0)
}

/// Human-traceable, collision-free file name for a tile.
///
/// The name carries the ground distance covered by 100 pixels and the
/// south-west corner in degrees, with enough decimals to tell neighbouring
/// tiles apart, e.g. `1.2km_50.0612_19.9370.jpg`. A numeric suffix is added
/// while the name is taken.
pub(crate) fn tile_filename(
    projection: &dyn Projection,
    pixels_per_unit: f64,
    east: f64,
    north: f64,
    extension: &str,
    taken: &HashSet<&str>,
) -> String {
    let corner = projection.east_north_to_lat_lon(EastNorth::new(east, north));
    let hundred_px =
        projection.east_north_to_lat_lon(EastNorth::new(east + 100.0 / pixels_per_unit, north));
    let one_px_north =
        projection.east_north_to_lat_lon(EastNorth::new(east, north + 1.0 / pixels_per_unit));

    let delta = (one_px_north.lat - corner.lat).abs();
    let precision = if delta > 0.0 {
        (1 - delta.log10().ceil() as i32).clamp(0, 10) as usize
    } else {
        6
    };

    let base = format!(
        "{}_{:.p$}_{:.p$}",
        format_distance(corner.distance_to(&hundred_px)),
        corner.lat,
        corner.lon,
        p = precision
    );

    let mut name = format!("{}.{}", base, extension);
    let mut counter = 1;
    while taken.contains(name.as_str()) {
        name = format!("{}_{}.{}", base, counter, extension);
        counter += 1;
    }
    name
}

fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.0}m", meters)
    } else {
        format!("{:.1}km", meters / 1000.0)
    }
}
