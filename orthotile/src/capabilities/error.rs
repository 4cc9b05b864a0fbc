//! Capabilities error types.

use std::io;

use thiserror::Error;

/// Failures that prevent a tile source from being built from its
/// capability document.
#[derive(Debug, Error)]
pub enum CapabilitiesError {
    /// Document bytes are not UTF-8.
    #[error("Capabilities document is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// Document is not well-formed XML.
    #[error("Capabilities document is not valid XML: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Root element is not `Capabilities`.
    #[error("Unexpected root element <{0}>, expected <Capabilities>")]
    UnexpectedRoot(String),

    /// Every layer was dropped or none were declared.
    #[error("No usable layers found in capabilities document")]
    NoUsableLayers,

    /// Document could not be downloaded.
    #[error("Failed to fetch capabilities from {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Reading or writing the on-disk document cache failed.
    #[error("Capabilities cache I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A layer whose image format has no decoder. Only that layer is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Layer '{layer}' uses unsupported image format '{format}'")]
pub struct UnsupportedFormat {
    pub layer: String,
    pub format: String,
}
