//! Per-host connection limits.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Caps concurrent requests per host.
///
/// Semaphores are created lazily on first use of a host and live as long
/// as the limiter.
#[derive(Debug)]
pub struct HostLimiter {
    per_host: usize,
    hosts: DashMap<String, Arc<Semaphore>>,
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.max(1),
            hosts: DashMap::new(),
        }
    }

    pub fn per_host(&self) -> usize {
        self.per_host
    }

    pub async fn acquire(&self, host: &str) -> Result<OwnedSemaphorePermit, AcquireError> {
        let semaphore = self.semaphore(host);
        semaphore.acquire_owned().await
    }

    /// Permits currently free for `host`.
    pub fn available(&self, host: &str) -> usize {
        self.hosts
            .get(host)
            .map_or(self.per_host, |s| s.available_permits())
    }

    fn semaphore(&self, host: &str) -> Arc<Semaphore> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
            .clone()
    }
}

/// `host[:port]` of a URL, lower-cased. Empty if the URL has no host.
pub fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.host_str().map(|host| match u.port() {
                Some(port) => format!("{}:{}", host.to_ascii_lowercase(), port),
                None => host.to_ascii_lowercase(),
            })
        })
        .unwrap_or_default()
}
