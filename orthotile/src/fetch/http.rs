//! HTTP client abstraction for testability.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::error::FetchError;

/// Per-request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    pub connect: Duration,
    /// Bounds the whole request once connected.
    pub read: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(crate::config::DEFAULT_CONNECT_TIMEOUT_SECS),
            read: Duration::from_secs(crate::config::DEFAULT_READ_TIMEOUT_SECS),
        }
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
            body: body.into(),
        }
    }

    /// First value of header `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for asynchronous HTTP GET.
///
/// Error statuses are returned as responses, not errors, so callers can
/// inspect the body. Only transport failures are `Err`.
pub trait AsyncHttpClient: Send + Sync {
    fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeouts: FetchTimeouts,
    ) -> impl Future<Output = Result<HttpResponse, FetchError>> + Send;
}

/// HTTP client backed by reqwest.
///
/// reqwest fixes the connect timeout per client, so one client is kept
/// per distinct connect timeout.
#[derive(Debug)]
pub struct ReqwestHttpClient {
    clients: DashMap<Duration, reqwest::Client>,
    user_agent: String,
}

impl ReqwestHttpClient {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            clients: DashMap::new(),
            user_agent: user_agent.into(),
        }
    }

    fn client_for(&self, url: &str, connect: Duration) -> Result<reqwest::Client, FetchError> {
        if let Some(client) = self.clients.get(&connect) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .connect_timeout(connect)
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|e| FetchError::network(url, format!("failed to create HTTP client: {}", e)))?;
        debug!(connect_timeout = ?connect, "Created HTTP client");
        Ok(self.clients.entry(connect).or_insert(client).clone())
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new(crate::config::default_user_agent())
    }
}

impl AsyncHttpClient for ReqwestHttpClient {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeouts: FetchTimeouts,
    ) -> Result<HttpResponse, FetchError> {
        let client = self.client_for(url, timeouts.connect)?;
        let mut request = client.get(url).timeout(timeouts.read);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        trace!(url, "GET");
        let response = request.send().await.map_err(|e| classify(url, e))?;
        let status = response.status().as_u16();
        let response_headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| classify(url, e))?;

        debug!(url, status, bytes = body.len(), "HTTP response");
        Ok(HttpResponse::new(status, response_headers, body))
    }
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::network(url, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_names_lowercased() {
        let response = HttpResponse::new(
            200,
            vec![("X-Tile-Info".to_string(), "no-tile".to_string())],
            Bytes::new(),
        );
        assert_eq!(response.headers[0].0, "x-tile-info");
        assert_eq!(response.header("X-TILE-INFO"), Some("no-tile"));
        assert_eq!(response.header("content-type"), None);
    }

    #[test]
    fn test_is_success() {
        assert!(HttpResponse::new(204, vec![], Bytes::new()).is_success());
        assert!(!HttpResponse::new(304, vec![], Bytes::new()).is_success());
        assert!(!HttpResponse::new(503, vec![], Bytes::new()).is_success());
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = FetchTimeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(15));
        assert_eq!(timeouts.read, Duration::from_secs(30));
    }

    #[test]
    fn test_client_reused_per_connect_timeout() {
        let client = ReqwestHttpClient::new("test");
        client.client_for("http://a", Duration::from_secs(1)).unwrap();
        client.client_for("http://a", Duration::from_secs(1)).unwrap();
        client.client_for("http://a", Duration::from_secs(2)).unwrap();
        assert_eq!(client.clients.len(), 2);
    }
}
