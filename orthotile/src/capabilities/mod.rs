//! WMTS capability documents.
//!
//! [`parse_capabilities`] turns a document into [`Capabilities`]: the GetTile
//! endpoint, the transfer mode and one [`Layer`] per (layer, matrix set)
//! pair. [`load_capabilities`] downloads the document first, keeping a
//! copy in a [`CapabilitiesCache`].

mod error;
mod loader;
mod model;
mod parser;

pub use error::{CapabilitiesError, UnsupportedFormat};
pub use loader::{load_capabilities, CapabilitiesCache, CAPABILITIES_MAX_AGE};
pub use model::{Capabilities, Dimension, Layer, TransferMode};
pub use parser::{normalize_crs, parse_capabilities};
