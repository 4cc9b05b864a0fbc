//! Test doubles for the fetch layer.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::{AsyncHttpClient, FetchError, FetchTimeouts, HttpResponse};

/// Mock HTTP client with scripted responses per URL.
///
/// Each URL has a queue; the last response repeats once the queue is down
/// to one. Unknown URLs answer 404. A gated client holds every request
/// until [`open`](Self::open) releases it.
#[derive(Default)]
pub(crate) struct MockHttpClient {
    routes: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    requests: AtomicUsize,
    log: Mutex<Vec<(String, Vec<(String, String)>)>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockHttpClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub(crate) fn route(self, url: &str, response: HttpResponse) -> Self {
        self.push(url, response);
        self
    }

    pub(crate) fn push(&self, url: &str, response: HttpResponse) {
        self.routes
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Let `n` held requests through.
    pub(crate) fn open(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub(crate) fn last_headers(&self) -> Vec<(String, String)> {
        self.log
            .lock()
            .last()
            .map(|(_, headers)| headers.clone())
            .unwrap_or_default()
    }

    fn next_response(&self, url: &str) -> HttpResponse {
        let mut routes = self.routes.lock();
        match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => HttpResponse::new(404, Vec::new(), Vec::new()),
        }
    }
}

impl AsyncHttpClient for MockHttpClient {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        _timeouts: FetchTimeouts,
    ) -> Result<HttpResponse, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push((url.to_string(), headers.to_vec()));
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| FetchError::network(url, e))?
                .forget();
        }
        Ok(self.next_response(url))
    }
}

/// A PNG-encoded square tile of one colour.
pub(crate) fn png_tile(size: u32, color: [u8; 4]) -> Vec<u8> {
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(size, size, Rgba(color)));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub(crate) fn ok_png(size: u32, color: [u8; 4]) -> HttpResponse {
    HttpResponse::new(
        200,
        vec![("Content-Type".to_string(), "image/png".to_string())],
        png_tile(size, color),
    )
}
