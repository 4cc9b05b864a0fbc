//! Tile source backed by a WMTS capabilities document.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{SourceError, SourceSnapshot, TileSource};
use crate::address::{SourceKind, TileAddressBuilder};
use crate::cache::TileCacheStore;
use crate::capabilities::{Capabilities, Layer};
use crate::fetch::{FetchError, NoTilePolicy};
use crate::grid::{select_layer, CoordinateTransform, ProjectionUnavailable};
use crate::projection::ProjectionRegistry;

/// Optional settings for a [`WmtsTileSource`].
#[derive(Debug, Clone, Default)]
pub struct WmtsOptions {
    /// Matrix set to prefer when the layer has several in one CRS.
    pub matrix_set: Option<String>,
    /// Headers sent with every tile request.
    pub headers: Vec<(String, String)>,
    pub no_tile: NoTilePolicy,
}

#[derive(Debug)]
struct Binding {
    projection_code: String,
    result: Result<SourceSnapshot, ProjectionUnavailable>,
}

/// One layer of a WMTS server.
///
/// Serves no tiles until [`init_projection`](Self::init_projection)
/// succeeds; switching projection rebinds the layer to a matrix set in the
/// new CRS.
pub struct WmtsTileSource {
    id: String,
    capabilities: Arc<Capabilities>,
    layer_id: String,
    options: WmtsOptions,
    builder: TileAddressBuilder,
    registry: Arc<dyn ProjectionRegistry>,
    binding: RwLock<Option<Binding>>,
    cache: Arc<TileCacheStore>,
}

impl fmt::Debug for WmtsTileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WmtsTileSource")
            .field("id", &self.id)
            .field("layer", &self.layer_id)
            .field("projection", &self.projection_code())
            .finish_non_exhaustive()
    }
}

impl WmtsTileSource {
    /// Creates a source for `layer_id`.
    ///
    /// # Errors
    ///
    /// [`SourceError::UnknownLayer`] when the document has no such layer and
    /// [`SourceError::Address`] when a tile template uses unknown tokens.
    pub fn new(
        capabilities: Arc<Capabilities>,
        layer_id: &str,
        options: WmtsOptions,
        registry: Arc<dyn ProjectionRegistry>,
        cache: Arc<TileCacheStore>,
    ) -> Result<Self, SourceError> {
        if capabilities.layers_named(layer_id).next().is_none() {
            return Err(SourceError::UnknownLayer(layer_id.to_string()));
        }
        let builder = TileAddressBuilder::wmts(&capabilities, options.headers.clone())?;

        Ok(Self {
            id: format!("wmts:{}:{}", capabilities.base_url, layer_id),
            capabilities,
            layer_id: layer_id.to_string(),
            options,
            builder,
            registry,
            binding: RwLock::new(None),
            cache,
        })
    }

    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    pub fn capabilities(&self) -> &Arc<Capabilities> {
        &self.capabilities
    }

    /// Code of the projection last passed to `init_projection`.
    pub fn projection_code(&self) -> Option<String> {
        self.binding.read().as_ref().map(|b| b.projection_code.clone())
    }

    /// Bind the layer to a matrix set usable in `projection_code`.
    ///
    /// Calling again with the active projection is a no-op.
    pub fn init_projection(&self, projection_code: &str) -> Result<(), ProjectionUnavailable> {
        if let Some(binding) = self.binding.read().as_ref() {
            if binding.projection_code.eq_ignore_ascii_case(projection_code) {
                return binding.result.as_ref().map(|_| ()).map_err(Clone::clone);
            }
        }

        let result = select_layer(
            &self.capabilities.layers,
            &self.layer_id,
            self.options.matrix_set.as_deref(),
            projection_code,
            self.registry.as_ref(),
        )
        .map(|selection| {
            let transform = CoordinateTransform::new(
                Arc::clone(&selection.layer.tile_matrix_set),
                selection.projection,
            );
            SourceSnapshot::new(Arc::new(selection.layer), Arc::new(transform))
        });

        match &result {
            Ok(snapshot) => info!(
                layer = %self.layer_id,
                projection = projection_code,
                matrix_set = snapshot.layer.tile_matrix_set.identifier(),
                max_zoom = snapshot.transform.max_zoom(),
                "Bound layer to matrix set"
            ),
            Err(e) => debug!(error = %e, "Layer unavailable in projection"),
        }

        let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);
        *self.binding.write() = Some(Binding {
            projection_code: projection_code.to_string(),
            result,
        });
        outcome
    }

    /// Layer binding in use.
    pub fn layer(&self) -> Result<Arc<Layer>, FetchError> {
        Ok(self.snapshot()?.layer)
    }
}

impl TileSource for WmtsTileSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Wmts
    }

    fn snapshot(&self) -> Result<SourceSnapshot, FetchError> {
        match self.binding.read().as_ref() {
            Some(Binding {
                result: Ok(snapshot),
                ..
            }) => Ok(snapshot.clone()),
            Some(Binding {
                result: Err(e), ..
            }) => Err(e.clone().into()),
            None => Err(ProjectionUnavailable {
                layer: self.layer_id.clone(),
                projection: "<none>".to_string(),
            }
            .into()),
        }
    }

    fn address_builder(&self) -> &TileAddressBuilder {
        &self.builder
    }

    fn no_tile_policy(&self) -> &NoTilePolicy {
        &self.options.no_tile
    }

    fn cache(&self) -> &Arc<TileCacheStore> {
        &self.cache
    }
}
