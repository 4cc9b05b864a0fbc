//! Concrete tile addresses for a layer.

use std::collections::HashMap;

use tracing::trace;

use super::template::{AddressError, SourceKind, TileParameters, UrlTemplate};
use crate::capabilities::{Capabilities, Layer, TransferMode};
use crate::grid::CoordinateTransform;

/// Query string appended to the GetTile endpoint in KVP mode.
pub const KVP_QUERY: &str = "SERVICE=WMTS&REQUEST=GetTile&VERSION=1.0.0&LAYER={layer}\
&STYLE={style}&FORMAT={format}&tileMatrixSet={TileMatrixSet}&tileMatrix={TileMatrix}\
&tileRow={TileRow}&tileCol={TileCol}";

/// URL plus the headers to send with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileAddress {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Expands templates into tile URLs.
///
/// All templates are parsed and validated when the builder is created, so
/// a known protocol never sends a request with an unsubstituted token.
#[derive(Debug, Clone)]
pub struct TileAddressBuilder {
    kind: SourceKind,
    mode: TransferMode,
    /// Shared template (KVP endpoint, WMS or TMS URL).
    template: Option<UrlTemplate>,
    /// Per-layer REST templates keyed by their raw text.
    rest_templates: HashMap<String, UrlTemplate>,
    headers: Vec<(String, String)>,
}

impl TileAddressBuilder {
    /// Builder for a WMTS source.
    ///
    /// `headers` are sent with every request in addition to those embedded
    /// in templates.
    ///
    /// # Errors
    ///
    /// [`AddressError::UnknownToken`] if any template uses a token that is
    /// neither a WMTS token nor a dimension of its layer.
    pub fn wmts(
        capabilities: &Capabilities,
        headers: Vec<(String, String)>,
    ) -> Result<Self, AddressError> {
        let mut builder = Self {
            kind: SourceKind::Wmts,
            mode: capabilities.transfer_mode,
            template: None,
            rest_templates: HashMap::new(),
            headers,
        };

        match capabilities.transfer_mode {
            TransferMode::Kvp => {
                let template = UrlTemplate::parse(&kvp_url(&capabilities.base_url));
                template.validate(SourceKind::Wmts, &[])?;
                builder.template = Some(template);
            }
            TransferMode::Rest => {
                for layer in &capabilities.layers {
                    let Some(raw) = &layer.rest_template else {
                        continue;
                    };
                    if builder.rest_templates.contains_key(raw) {
                        continue;
                    }
                    let template = UrlTemplate::parse(raw);
                    let dimensions: Vec<&str> =
                        layer.dimensions.iter().map(|d| d.identifier.as_str()).collect();
                    template.validate(SourceKind::Wmts, &dimensions)?;
                    builder.rest_templates.insert(raw.clone(), template);
                }
            }
        }

        Ok(builder)
    }

    /// Builder for a single-template WMS or TMS source.
    ///
    /// # Errors
    ///
    /// [`AddressError::UnknownToken`] for WMS templates with tokens outside
    /// the WMS set.
    pub fn templated(kind: SourceKind, raw: &str) -> Result<Self, AddressError> {
        let template = UrlTemplate::parse(raw);
        template.validate(kind, &[])?;
        Ok(Self {
            kind,
            mode: TransferMode::Rest,
            template: Some(template),
            rest_templates: HashMap::new(),
            headers: Vec::new(),
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Address of tile `(x, y)` at `zoom` in `layer`.
    ///
    /// `transform` must be built from the layer's matrix set.
    ///
    /// # Errors
    ///
    /// Fails before any network access when the tile lies outside the
    /// matrix extent or the zoom is deeper than the matrix set, and when a
    /// REST layer has no template.
    pub fn build_url(
        &self,
        layer: &Layer,
        transform: &CoordinateTransform,
        x: u32,
        y: u32,
        zoom: u8,
    ) -> Result<TileAddress, AddressError> {
        let matrix_set = transform.matrix_set();
        let matrix = matrix_set
            .matrix(zoom)
            .ok_or(AddressError::ZoomOutOfRange {
                zoom,
                max_zoom: matrix_set.max_zoom(),
            })?;

        let x_max = transform.tile_x_max(zoom).unwrap_or(0);
        let y_max = transform.tile_y_max(zoom).unwrap_or(0);
        if x >= x_max || y >= y_max {
            return Err(AddressError::OutOfRange {
                x,
                y,
                zoom,
                x_max,
                y_max,
            });
        }

        let template = self.template_for(layer)?;
        let projection = transform.projection();
        let bbox_lat_first = self.kind == SourceKind::Wms
            && projection.switch_xy()
            && template.as_str().to_ascii_lowercase().contains("crs=");

        let params = TileParameters {
            layer: &layer.identifier,
            style: &layer.style,
            format: &layer.format,
            matrix_set: matrix_set.identifier(),
            matrix: matrix.identifier(),
            x,
            y,
            zoom,
            rows: y_max,
            tile_size: matrix.tile_size(),
            projection_code: projection.code(),
            bbox: transform.tile_bounds(x, y, zoom),
            bbox_lat_first,
            dimensions: &layer.dimensions,
        };

        let url = template.expand(&params);
        trace!(url = %url, x, y, zoom, "Built tile URL");

        let mut headers = self.headers.clone();
        headers.extend(template.headers().iter().cloned());
        Ok(TileAddress { url, headers })
    }

    fn template_for(&self, layer: &Layer) -> Result<&UrlTemplate, AddressError> {
        if self.kind == SourceKind::Wmts && self.mode == TransferMode::Rest {
            return layer
                .rest_template
                .as_ref()
                .and_then(|raw| self.rest_templates.get(raw))
                .ok_or_else(|| AddressError::MissingTemplate(layer.identifier.clone()));
        }
        self.template
            .as_ref()
            .ok_or_else(|| AddressError::MissingTemplate(layer.identifier.clone()))
    }
}

/// Joins the GetTile endpoint and the KVP query.
fn kvp_url(base_url: &str) -> String {
    let separator = if base_url.ends_with('?') || base_url.ends_with('&') {
        ""
    } else if base_url.contains('?') {
        "&"
    } else {
        "?"
    };
    format!("{}{}{}", base_url, separator, KVP_QUERY)
}
