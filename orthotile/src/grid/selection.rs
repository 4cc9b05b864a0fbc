//! Binding a layer to the tile matrix set of a projection.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::capabilities::Layer;
use crate::projection::{Projection, ProjectionRegistry};

/// No matrix set of the layer can be used in the requested projection.
///
/// The source serves no tiles while this persists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Layer '{layer}' has no tile matrix set usable in projection {projection}")]
pub struct ProjectionUnavailable {
    pub layer: String,
    pub projection: String,
}

/// A layer paired with the projection of its matrix set.
#[derive(Debug, Clone)]
pub struct Selection {
    pub layer: Layer,
    pub projection: Arc<dyn Projection>,
}

/// Picks the layer binding to use for `projection_code`.
///
/// 1. Layers named `layer_id` whose matrix set CRS equals `projection_code`.
/// 2. Among those, the one using `preferred_matrix_set`, else the first.
/// 3. Without an exact CRS match, the first binding of the layer (document
///    order) whose CRS the registry can resolve.
///
/// # Errors
///
/// [`ProjectionUnavailable`] when no binding qualifies.
pub fn select_layer(
    layers: &[Layer],
    layer_id: &str,
    preferred_matrix_set: Option<&str>,
    projection_code: &str,
    registry: &dyn ProjectionRegistry,
) -> Result<Selection, ProjectionUnavailable> {
    let named: Vec<&Layer> = layers.iter().filter(|l| l.identifier == layer_id).collect();

    if let Some(projection) = registry.by_code(projection_code) {
        let exact: Vec<&Layer> = named
            .iter()
            .copied()
            .filter(|l| l.crs().eq_ignore_ascii_case(projection_code))
            .collect();

        let preferred = preferred_matrix_set.and_then(|wanted| {
            exact
                .iter()
                .copied()
                .find(|l| l.tile_matrix_set.identifier() == wanted)
        });

        if let Some(layer) = preferred.or_else(|| exact.first().copied()) {
            debug!(
                layer = layer_id,
                matrix_set = layer.tile_matrix_set.identifier(),
                projection = projection_code,
                "Selected tile matrix set"
            );
            return Ok(Selection {
                layer: layer.clone(),
                projection,
            });
        }
    }

    // Order-dependent: the first resolvable binding in document order wins.
    for layer in named {
        if let Some(projection) = registry.by_code(layer.crs()) {
            warn!(
                layer = layer_id,
                requested = projection_code,
                using = layer.crs(),
                matrix_set = layer.tile_matrix_set.identifier(),
                "No tile matrix set for requested projection, falling back"
            );
            return Ok(Selection {
                layer: layer.clone(),
                projection,
            });
        }
    }

    Err(ProjectionUnavailable {
        layer: layer_id.to_string(),
        projection: projection_code.to_string(),
    })
}
