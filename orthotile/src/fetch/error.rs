//! Fetch error types.

use thiserror::Error;

use crate::address::AddressError;
use crate::grid::ProjectionUnavailable;

/// Errors that fail a single tile fetch.
///
/// Cloneable so one outcome can be shared by every listener of a job.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection or transfer failure.
    #[error("Network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// Connect or read timeout elapsed.
    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    /// Server answered with an error status.
    #[error("HTTP {status} from {url}: {message}")]
    Http {
        url: String,
        status: u16,
        message: String,
    },

    /// Response body is not a decodable image.
    #[error("Failed to decode tile from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Unavailable(#[from] ProjectionUnavailable),

    #[error("Tile cache error: {0}")]
    Cache(String),
}

impl FetchError {
    pub(crate) fn network(url: &str, reason: impl ToString) -> Self {
        Self::Network {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}
