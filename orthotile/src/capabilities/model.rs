//! Layer model produced by the capabilities parser.

use std::sync::Arc;

use crate::grid::TileMatrixSet;

/// How GetTile requests are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Path templates taken from each layer's `ResourceURL`.
    Rest,
    /// Key-value pairs appended to the GetTile endpoint.
    Kvp,
}

impl TransferMode {
    /// Parses the value of a `GetEncoding` constraint.
    pub fn from_encoding(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kvp" => Some(Self::Kvp),
            "restful" | "rest" => Some(Self::Rest),
            _ => None,
        }
    }
}

/// An extra request dimension such as `Time` or `Elevation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub identifier: String,
    pub default: String,
    pub values: Vec<String>,
}

/// A layer bound to one tile matrix set.
///
/// A server layer offered in several matrix sets appears once per set, all
/// copies sharing identifier, format and style.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub identifier: String,
    pub title: String,
    /// Image MIME type, always one the crate can decode.
    pub format: String,
    /// Default style identifier, empty when none is flagged as default.
    pub style: String,
    /// REST path template (`ResourceURL` with `resourceType="tile"`).
    pub rest_template: Option<String>,
    pub tile_matrix_set: Arc<TileMatrixSet>,
    pub dimensions: Vec<Dimension>,
}

impl Layer {
    /// CRS code of the layer's matrix set.
    pub fn crs(&self) -> &str {
        self.tile_matrix_set.crs()
    }
}

/// Parsed capability document.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// GetTile endpoint for KVP, or the document URL when no operation was advertised.
    pub base_url: String,
    pub transfer_mode: TransferMode,
    pub layers: Vec<Layer>,
}

impl Capabilities {
    /// Distinct layer identifiers, in document order.
    pub fn layer_identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for layer in &self.layers {
            if !ids.contains(&layer.identifier.as_str()) {
                ids.push(&layer.identifier);
            }
        }
        ids
    }

    /// All matrix-set bindings of one layer.
    pub fn layers_named<'a>(&'a self, identifier: &'a str) -> impl Iterator<Item = &'a Layer> + 'a {
        self.layers.iter().filter(move |l| l.identifier == identifier)
    }
}
