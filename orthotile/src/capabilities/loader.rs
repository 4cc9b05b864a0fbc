//! Downloading capability documents, with an on-disk copy.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use super::error::CapabilitiesError;
use super::model::Capabilities;
use super::parser::parse_capabilities;
use crate::address::UrlTemplate;
use crate::cache::url_key;
use crate::fetch::{describe_error, AsyncHttpClient, FetchTimeouts};
use crate::projection::ProjectionRegistry;

/// How long a downloaded document is used before it is fetched again.
pub const CAPABILITIES_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Directory of downloaded capability documents, one file per URL.
#[derive(Debug, Clone)]
pub struct CapabilitiesCache {
    directory: PathBuf,
    max_age: Duration,
}

impl CapabilitiesCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_age: CAPABILITIES_MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.directory.join(format!("{}.xml", url_key(url)))
    }

    /// Cached document for `url` if it is younger than the max age.
    pub async fn read_fresh(&self, url: &str) -> Option<Vec<u8>> {
        let path = self.path_for(url);
        let modified = tokio::fs::metadata(&path).await.ok()?.modified().ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age >= self.max_age {
            debug!(url, age_secs = age.as_secs(), "Cached capabilities expired");
            return None;
        }
        tokio::fs::read(&path).await.ok()
    }

    /// Cached document for `url` regardless of age.
    pub async fn read_any(&self, url: &str) -> Option<Vec<u8>> {
        tokio::fs::read(self.path_for(url)).await.ok()
    }

    pub async fn write(&self, url: &str, document: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let path = self.path_for(url);
        let tmp = path.with_extension("xml.tmp");
        tokio::fs::write(&tmp, document).await?;
        tokio::fs::rename(&tmp, &path).await
    }
}

/// Fetch and parse the capability document at `url`.
///
/// Header tokens in `url` are sent as request headers. With a `cache`, a
/// fresh stored copy is used without network access, a successful download
/// replaces it, and a failed download falls back to a stale copy.
///
/// # Errors
///
/// [`CapabilitiesError::Fetch`] when the document cannot be downloaded and
/// no stored copy exists, or any parse error.
pub async fn load_capabilities<C: AsyncHttpClient>(
    client: &C,
    url: &str,
    timeouts: FetchTimeouts,
    cache: Option<&CapabilitiesCache>,
    registry: &dyn ProjectionRegistry,
) -> Result<Capabilities, CapabilitiesError> {
    let template = UrlTemplate::parse(url);
    let document_url = template.as_str();

    if let Some(cache) = cache {
        if let Some(document) = cache.read_fresh(document_url).await {
            match parse_capabilities(&document, document_url, registry) {
                Ok(capabilities) => {
                    debug!(url = document_url, "Using cached capabilities");
                    return Ok(capabilities);
                }
                Err(e) => warn!(url = document_url, error = %e, "Discarding cached capabilities"),
            }
        }
    }

    let downloaded = download(client, document_url, template.headers(), timeouts).await;
    let document = match (downloaded, cache) {
        (Ok(document), _) => document,
        (Err(e), Some(cache)) => match cache.read_any(document_url).await {
            Some(stale) => {
                warn!(url = document_url, error = %e, "Download failed, using stale capabilities");
                return parse_capabilities(&stale, document_url, registry);
            }
            None => return Err(e),
        },
        (Err(e), None) => return Err(e),
    };

    let capabilities = parse_capabilities(&document, document_url, registry)?;
    info!(
        url = document_url,
        layers = capabilities.layer_identifiers().len(),
        "Loaded capabilities"
    );

    if let Some(cache) = cache {
        if let Err(e) = cache.write(document_url, &document).await {
            warn!(url = document_url, error = %e, "Failed to cache capabilities");
        }
    }
    Ok(capabilities)
}

async fn download<C: AsyncHttpClient>(
    client: &C,
    url: &str,
    headers: &[(String, String)],
    timeouts: FetchTimeouts,
) -> Result<Vec<u8>, CapabilitiesError> {
    let response = client
        .get(url, headers, timeouts)
        .await
        .map_err(|e| CapabilitiesError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if !response.is_success() {
        return Err(CapabilitiesError::Fetch {
            url: url.to_string(),
            reason: format!(
                "HTTP {}: {}",
                response.status,
                describe_error(response.status, &response.body)
            ),
        });
    }
    Ok(response.body.to_vec())
}
