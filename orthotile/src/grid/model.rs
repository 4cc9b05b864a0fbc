//! Tile matrix and tile matrix set model.
//!
//! Both types validate themselves at construction, so everything downstream
//! (transforms, address building, cache keys) can rely on square tiles and a
//! strictly decreasing scale ordering without re-checking.

use thiserror::Error;

use crate::projection::EastNorth;

/// Errors raised while building tile matrices.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatrixError {
    /// Tile width and height differ.
    #[error("Tile matrix '{identifier}' has non-square tiles ({width}x{height})")]
    NonSquareTile {
        identifier: String,
        width: u32,
        height: u32,
    },

    /// Tile size of zero.
    #[error("Tile matrix '{identifier}' declares a zero tile size")]
    ZeroTileSize { identifier: String },

    /// Scale denominator is zero, negative or not a number.
    #[error("Tile matrix '{identifier}' has invalid scale denominator {value}")]
    InvalidScale { identifier: String, value: f64 },

    /// Scales are not strictly decreasing from one zoom to the next.
    #[error(
        "Tile matrix set '{set}' is not strictly decreasing in scale at '{identifier}' \
         ({previous} -> {current})"
    )]
    NonMonotonicScale {
        set: String,
        identifier: String,
        previous: f64,
        current: f64,
    },

    /// Set without any matrices.
    #[error("Tile matrix set '{0}' contains no tile matrices")]
    Empty(String),

    /// A required element was missing or could not be read.
    #[error("Tile matrix field '{field}' is missing or invalid: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// One zoom level's grid: origin, resolution, tile size and extent.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMatrix {
    identifier: String,
    scale_denominator: f64,
    top_left_corner: EastNorth,
    tile_size: u32,
    matrix_width: Option<u32>,
    matrix_height: Option<u32>,
}

impl TileMatrix {
    /// Creates a tile matrix.
    ///
    /// `declared_corner` is the top-left corner in the order the CRS
    /// declares its axes. When `switch_xy` is set the two components are
    /// exchanged here, once, so the stored corner is always east/north.
    ///
    /// # Errors
    ///
    /// Fails for non-square or zero-sized tiles and for a scale denominator
    /// that is not a positive finite number.
    pub fn new(
        identifier: impl Into<String>,
        scale_denominator: f64,
        declared_corner: EastNorth,
        switch_xy: bool,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self, MatrixError> {
        let identifier = identifier.into();

        if tile_width != tile_height {
            return Err(MatrixError::NonSquareTile {
                identifier,
                width: tile_width,
                height: tile_height,
            });
        }
        if tile_width == 0 {
            return Err(MatrixError::ZeroTileSize { identifier });
        }
        if !scale_denominator.is_finite() || scale_denominator <= 0.0 {
            return Err(MatrixError::InvalidScale {
                identifier,
                value: scale_denominator,
            });
        }

        let top_left_corner = if switch_xy {
            declared_corner.swapped()
        } else {
            declared_corner
        };

        Ok(Self {
            identifier,
            scale_denominator,
            top_left_corner,
            tile_size: tile_width,
            matrix_width: None,
            matrix_height: None,
        })
    }

    /// Sets the declared grid extent in tiles.
    pub fn with_extent(mut self, matrix_width: Option<u32>, matrix_height: Option<u32>) -> Self {
        self.matrix_width = matrix_width;
        self.matrix_height = matrix_height;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn scale_denominator(&self) -> f64 {
        self.scale_denominator
    }

    /// Top-left corner in east/north order.
    pub fn top_left_corner(&self) -> EastNorth {
        self.top_left_corner
    }

    /// Tile edge length in pixels.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Declared number of tile columns, if the server gave one.
    pub fn matrix_width(&self) -> Option<u32> {
        self.matrix_width
    }

    /// Declared number of tile rows, if the server gave one.
    pub fn matrix_height(&self) -> Option<u32> {
        self.matrix_height
    }
}

/// Ordered collection of tile matrices for one CRS.
///
/// The index into [`matrices`](Self::matrices) is the zoom level, with
/// zoom 0 the coarsest.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMatrixSet {
    identifier: String,
    crs: String,
    matrices: Vec<TileMatrix>,
}

impl TileMatrixSet {
    /// Creates a tile matrix set from matrices ordered coarsest first.
    ///
    /// # Errors
    ///
    /// [`MatrixError::Empty`] for an empty list and
    /// [`MatrixError::NonMonotonicScale`] unless every scale denominator is
    /// strictly smaller than the one before it.
    pub fn new(
        identifier: impl Into<String>,
        crs: impl Into<String>,
        matrices: Vec<TileMatrix>,
    ) -> Result<Self, MatrixError> {
        let identifier = identifier.into();

        if matrices.is_empty() {
            return Err(MatrixError::Empty(identifier));
        }

        for pair in matrices.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            if current.scale_denominator >= previous.scale_denominator {
                return Err(MatrixError::NonMonotonicScale {
                    set: identifier,
                    identifier: current.identifier.clone(),
                    previous: previous.scale_denominator,
                    current: current.scale_denominator,
                });
            }
        }

        Ok(Self {
            identifier,
            crs: crs.into(),
            matrices,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// CRS code, normalised (e.g. `EPSG:3857`).
    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn matrices(&self) -> &[TileMatrix] {
        &self.matrices
    }

    /// Matrix for `zoom`, if the set goes that deep.
    pub fn matrix(&self, zoom: u8) -> Option<&TileMatrix> {
        self.matrices.get(usize::from(zoom))
    }

    /// Deepest zoom level available.
    pub fn max_zoom(&self) -> u8 {
        u8::try_from(self.matrices.len().saturating_sub(1)).unwrap_or(u8::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(id: &str, scale: f64) -> TileMatrix {
        TileMatrix::new(id, scale, EastNorth::new(-180.0, 90.0), false, 256, 256).unwrap()
    }

    #[test]
    fn test_non_square_tiles_rejected() {
        let result = TileMatrix::new("0", 1000.0, EastNorth::new(0.0, 0.0), false, 256, 512);
        assert!(matches!(result, Err(MatrixError::NonSquareTile { width: 256, height: 512, .. })));
    }

    #[test]
    fn test_invalid_scale_rejected() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = TileMatrix::new("0", bad, EastNorth::new(0.0, 0.0), false, 256, 256);
            assert!(matches!(result, Err(MatrixError::InvalidScale { .. })), "accepted {}", bad);
        }
    }

    #[test]
    fn test_axis_swap_applied_at_construction() {
        let m = TileMatrix::new("0", 1000.0, EastNorth::new(90.0, -180.0), true, 256, 256).unwrap();
        assert_eq!(m.top_left_corner(), EastNorth::new(-180.0, 90.0));
    }

    #[test]
    fn test_extent_defaults_to_undeclared() {
        let m = matrix("0", 1000.0);
        assert_eq!(m.matrix_width(), None);
        let m = m.with_extent(Some(4), Some(2));
        assert_eq!(m.matrix_width(), Some(4));
        assert_eq!(m.matrix_height(), Some(2));
    }

    #[test]
    fn test_set_requires_strictly_decreasing_scales() {
        let ok = TileMatrixSet::new(
            "grid",
            "EPSG:3857",
            vec![matrix("0", 4000.0), matrix("1", 2000.0), matrix("2", 1000.0)],
        );
        assert!(ok.is_ok());

        let increasing = TileMatrixSet::new(
            "grid",
            "EPSG:3857",
            vec![matrix("0", 1000.0), matrix("1", 2000.0)],
        );
        assert!(matches!(increasing, Err(MatrixError::NonMonotonicScale { .. })));

        let duplicate = TileMatrixSet::new(
            "grid",
            "EPSG:3857",
            vec![matrix("0", 1000.0), matrix("1", 1000.0)],
        );
        assert!(matches!(duplicate, Err(MatrixError::NonMonotonicScale { .. })));
    }

    #[test]
    fn test_empty_set_rejected() {
        let result = TileMatrixSet::new("grid", "EPSG:3857", Vec::new());
        assert_eq!(result, Err(MatrixError::Empty("grid".to_string())));
    }

    #[test]
    fn test_zoom_lookup() {
        let set = TileMatrixSet::new(
            "grid",
            "EPSG:3857",
            vec![matrix("a", 4000.0), matrix("b", 2000.0)],
        )
        .unwrap();
        assert_eq!(set.max_zoom(), 1);
        assert_eq!(set.matrix(1).unwrap().identifier(), "b");
        assert!(set.matrix(2).is_none());
    }
}
