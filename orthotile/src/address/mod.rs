//! Tile addressing: URL templates and the builder that fills them.
//!
//! WMTS sources use either per-layer REST templates or the GetTile KVP
//! endpoint; WMS and TMS sources use a single user-supplied template.

mod builder;
mod template;

pub use builder::{TileAddress, TileAddressBuilder, KVP_QUERY};
pub use template::{AddressError, SourceKind, TileParameters, UrlTemplate};
