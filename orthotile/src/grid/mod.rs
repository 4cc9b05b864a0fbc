//! Tile grids: matrix model, projection binding and coordinate transforms.

mod model;
mod selection;
mod transform;

pub use model::{MatrixError, TileMatrix, TileMatrixSet};
pub use selection::{select_layer, ProjectionUnavailable, Selection};
pub use transform::{
    CoordinateTransform, TilePosition, STANDARD_PIXEL_SIZE, TILE_CONTAINMENT_TOLERANCE,
};
