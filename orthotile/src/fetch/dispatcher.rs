//! Deduplicating tile fetch dispatcher.
//!
//! # Flow
//!
//! ```text
//! submit ──► in-flight map ──(new key)──► task
//!               │                           │
//!         (same key: attach listener)       ├─ exact cache match ──► CacheHit
//!                                           ├─ host permit, pool permit
//!                                           ├─ GET (503 retried)
//!                                           ├─ no-tile? store marker
//!                                           └─ decode, store ──► listeners
//! ```
//!
//! One job exists per tile while it is in flight. A tile is identified by
//! its source, its grid (projection and matrix set) and its coordinates;
//! the grid is read once at submit and the job's cache key and URL both
//! come from that reading. Every request for the same tile attaches to
//! that job, and all of its listeners are notified with the same outcome
//! once it finishes.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace, warn};

use super::error::FetchError;
use super::http::{AsyncHttpClient, FetchTimeouts, HttpResponse};
use super::job::{CachedFetchJob, JobState};
use super::limiter::{host_of, HostLimiter};
use super::listener::{TileListener, TileOutcome};
use super::policy::describe_error;
use crate::address::{SourceKind, TileAddress};
use crate::cache::{CachedTile, TileData};
use crate::config::{
    NetworkSettings, DEFAULT_MAX_PER_HOST, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS,
    DEFAULT_TMS_THREADS, DEFAULT_WMS_THREADS, DEFAULT_WMTS_THREADS,
};
use crate::imaging;
use crate::source::{CacheKey, TilePlan, TileRequest, TileSource};

/// HTTP status a busy server answers with.
const SERVICE_UNAVAILABLE: u16 = 503;

/// Grid part of the dedup key for tiles whose source can't address them.
const UNPLANNED_GRID: &str = "-";

/// Dispatcher limits and retry behaviour.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Timeouts used by [`FetchDispatcher::submit`].
    pub timeouts: FetchTimeouts,
    pub wmts_threads: usize,
    pub wms_threads: usize,
    pub tms_threads: usize,
    pub max_per_host: usize,
    /// Extra attempts after a 503.
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeouts: FetchTimeouts::default(),
            wmts_threads: DEFAULT_WMTS_THREADS,
            wms_threads: DEFAULT_WMS_THREADS,
            tms_threads: DEFAULT_TMS_THREADS,
            max_per_host: DEFAULT_MAX_PER_HOST,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl DispatcherConfig {
    pub fn from_settings(settings: &NetworkSettings) -> Self {
        Self {
            timeouts: settings.timeouts(),
            wmts_threads: settings.wmts_threads,
            wms_threads: settings.wms_threads,
            tms_threads: settings.tms_threads,
            max_per_host: settings.max_per_host,
            retry_count: settings.retry_count,
            retry_delay: Duration::from_millis(settings.retry_delay),
        }
    }

    fn threads(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::Wmts => self.wmts_threads,
            SourceKind::Wms => self.wms_threads,
            SourceKind::Tms => self.tms_threads,
        }
    }
}

/// Counters of a [`FetchDispatcher`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub submitted: u64,
    /// Requests attached to a job already in flight.
    pub deduplicated: u64,
    pub cache_hits: u64,
    /// HTTP requests sent, retries included.
    pub downloads: u64,
    pub loaded: u64,
    pub no_tile: u64,
    pub failed: u64,
    pub canceled: u64,
    pub in_flight: usize,
}

impl fmt::Display for DispatcherStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} submitted ({} deduplicated), {} cache hits, {} downloads, \
             {} loaded, {} no-tile, {} failed, {} canceled, {} in flight",
            self.submitted,
            self.deduplicated,
            self.cache_hits,
            self.downloads,
            self.loaded,
            self.no_tile,
            self.failed,
            self.canceled,
            self.in_flight
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    deduplicated: AtomicU64,
    cache_hits: AtomicU64,
    downloads: AtomicU64,
    loaded: AtomicU64,
    no_tile: AtomicU64,
    failed: AtomicU64,
    canceled: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, outcome: &TileOutcome) {
        let counter = match outcome {
            TileOutcome::Loaded { .. } => &self.loaded,
            TileOutcome::NoTileAtZoom => &self.no_tile,
            TileOutcome::Failed { .. } => &self.failed,
            TileOutcome::Canceled => &self.canceled,
        };
        Self::bump(counter);
    }
}

/// Handle to a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job: Arc<CachedFetchJob>,
}

impl JobHandle {
    pub fn request(&self) -> &TileRequest {
        self.job.request()
    }

    pub fn state(&self) -> JobState {
        self.job.state()
    }

    /// Cancel the job if it is still queued.
    ///
    /// The job is shared with every request for the same tile, so all of
    /// its listeners receive [`TileOutcome::Canceled`]. Returns false once
    /// the fetch has started; the job then completes normally.
    pub fn cancel(&self) -> bool {
        let canceled = self.job.cancel();
        if canceled {
            debug!(tile = %self.job.request(), "Canceled queued tile");
        }
        canceled
    }
}

struct Inner<C> {
    client: C,
    config: DispatcherConfig,
    wmts_pool: Arc<Semaphore>,
    wms_pool: Arc<Semaphore>,
    tms_pool: Arc<Semaphore>,
    hosts: HostLimiter,
    in_flight: Mutex<HashMap<String, Arc<CachedFetchJob>>>,
    counters: Counters,
}

/// Runs tile fetches with deduplication and concurrency limits.
///
/// Each protocol has its own worker pool so a slow WMS server cannot starve
/// WMTS tiles, and every host is capped at `max_per_host` concurrent
/// requests. A request waiting for its host holds no pool slot.
pub struct FetchDispatcher<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for FetchDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for FetchDispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchDispatcher")
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

impl<C: AsyncHttpClient + 'static> FetchDispatcher<C> {
    pub fn new(client: C, config: DispatcherConfig) -> Self {
        let pool = |kind| Arc::new(Semaphore::new(config.threads(kind).max(1)));
        let inner = Inner {
            wmts_pool: pool(SourceKind::Wmts),
            wms_pool: pool(SourceKind::Wms),
            tms_pool: pool(SourceKind::Tms),
            hosts: HostLimiter::new(config.max_per_host),
            client,
            config,
            in_flight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Request tile `(x, y)` at `zoom` with the default timeouts.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        &self,
        source: Arc<dyn TileSource>,
        x: u32,
        y: u32,
        zoom: u8,
        listener: Arc<dyn TileListener>,
    ) -> JobHandle {
        let timeouts = self.inner.config.timeouts;
        self.submit_with_timeouts(source, x, y, zoom, listener, timeouts)
    }

    /// Request a tile with explicit timeouts.
    ///
    /// If the tile is already in flight the listener is attached to that
    /// job and `timeouts` is ignored.
    pub fn submit_with_timeouts(
        &self,
        source: Arc<dyn TileSource>,
        x: u32,
        y: u32,
        zoom: u8,
        listener: Arc<dyn TileListener>,
        timeouts: FetchTimeouts,
    ) -> JobHandle {
        let request = source.request(x, y, zoom);
        let plan = source.plan(x, y, zoom);
        let key = match &plan {
            Ok(plan) => request.dedup_key(&plan.grid),
            Err(_) => request.dedup_key(UNPLANNED_GRID),
        };
        Counters::bump(&self.inner.counters.submitted);

        let job = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(existing) = in_flight.get(&key) {
                if existing.state() != JobState::Canceled {
                    existing.add_listener(listener);
                    Counters::bump(&self.inner.counters.deduplicated);
                    trace!(tile = %request, "Attached to in-flight job");
                    return JobHandle {
                        job: Arc::clone(existing),
                    };
                }
            }

            let job = Arc::new(CachedFetchJob::new(request));
            job.add_listener(listener);
            job.transition(JobState::Submitted);
            in_flight.insert(key.clone(), Arc::clone(&job));
            job
        };

        let inner = Arc::clone(&self.inner);
        let task_job = Arc::clone(&job);
        tokio::spawn(async move {
            inner.run(task_job, key, source, plan, timeouts).await;
        });

        JobHandle { job }
    }

    /// Fetch a tile and wait for its outcome.
    pub async fn fetch(
        &self,
        source: Arc<dyn TileSource>,
        x: u32,
        y: u32,
        zoom: u8,
    ) -> TileOutcome {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let listener = move |_: &TileRequest, outcome: &TileOutcome| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(outcome.clone());
            }
        };
        self.submit(source, x, y, zoom, Arc::new(listener));
        rx.await.unwrap_or(TileOutcome::Canceled)
    }

    /// Number of jobs currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    pub fn stats(&self) -> DispatcherStats {
        let c = &self.inner.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        DispatcherStats {
            submitted: load(&c.submitted),
            deduplicated: load(&c.deduplicated),
            cache_hits: load(&c.cache_hits),
            downloads: load(&c.downloads),
            loaded: load(&c.loaded),
            no_tile: load(&c.no_tile),
            failed: load(&c.failed),
            canceled: load(&c.canceled),
            in_flight: self.in_flight(),
        }
    }
}

impl<C: AsyncHttpClient + 'static> Inner<C> {
    async fn run(
        &self,
        job: Arc<CachedFetchJob>,
        key: String,
        source: Arc<dyn TileSource>,
        plan: Result<TilePlan, FetchError>,
        timeouts: FetchTimeouts,
    ) {
        let outcome = match plan {
            Ok(plan) => self.execute(&job, &source, plan, timeouts).await,
            Err(e) => fail(&job, e, source.tile_size(job.request().zoom)),
        };
        self.finish(&job, &key, outcome);
    }

    async fn execute(
        &self,
        job: &CachedFetchJob,
        source: &Arc<dyn TileSource>,
        plan: TilePlan,
        timeouts: FetchTimeouts,
    ) -> TileOutcome {
        let request = job.request();
        let TilePlan {
            key,
            address,
            tile_size,
            ..
        } = plan;

        if let Some(cached) = lookup(source, &key).await {
            if !job.transition(JobState::CacheHit) {
                return TileOutcome::Canceled;
            }
            Counters::bump(&self.counters.cache_hits);
            return match cached {
                CachedTile::Image(image) => {
                    job.transition(JobState::Success);
                    TileOutcome::Loaded {
                        image,
                        from_cache: true,
                    }
                }
                CachedTile::NoTile => {
                    job.transition(JobState::NoTileAtZoom);
                    TileOutcome::NoTileAtZoom
                }
            };
        }

        let host = host_of(&address.url);
        let permits = tokio::select! {
            biased;
            _ = job.cancellation().cancelled() => return TileOutcome::Canceled,
            permits = self.acquire(source.kind(), &host) => permits,
        };
        let Some(permits) = permits else {
            return fail(job, FetchError::network(&address.url, "dispatcher closed"), tile_size);
        };

        if !job.transition(JobState::Fetching) {
            return TileOutcome::Canceled;
        }
        trace!(tile = %request, url = %address.url, "Fetching tile");

        let response = self.download(&address, timeouts).await;
        drop(permits);

        let result = match response {
            Ok(response) => complete(source, &key, &address.url, response).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                let state = match outcome {
                    TileOutcome::NoTileAtZoom => JobState::NoTileAtZoom,
                    _ => JobState::Success,
                };
                job.transition(state);
                outcome
            }
            Err(e) => fail(job, e, tile_size),
        }
    }

    async fn acquire(
        &self,
        kind: SourceKind,
        host: &str,
    ) -> Option<(OwnedSemaphorePermit, OwnedSemaphorePermit)> {
        let host_permit = self.hosts.acquire(host).await.ok()?;
        let pool = match kind {
            SourceKind::Wmts => &self.wmts_pool,
            SourceKind::Wms => &self.wms_pool,
            SourceKind::Tms => &self.tms_pool,
        };
        let pool_permit = Arc::clone(pool).acquire_owned().await.ok()?;
        Some((host_permit, pool_permit))
    }

    async fn download(
        &self,
        address: &TileAddress,
        timeouts: FetchTimeouts,
    ) -> Result<HttpResponse, FetchError> {
        let mut attempt = 0;
        loop {
            Counters::bump(&self.counters.downloads);
            let response = self
                .client
                .get(&address.url, &address.headers, timeouts)
                .await?;
            if response.status != SERVICE_UNAVAILABLE || attempt >= self.config.retry_count {
                return Ok(response);
            }
            attempt += 1;
            debug!(url = %address.url, attempt, "Server busy, retrying");
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    fn finish(&self, job: &Arc<CachedFetchJob>, key: &str, outcome: TileOutcome) {
        let listeners = {
            let mut in_flight = self.in_flight.lock();
            if in_flight
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, job))
            {
                in_flight.remove(key);
            }
            job.take_listeners()
        };

        self.counters.record(&outcome);
        trace!(
            tile = %job.request(),
            outcome = outcome.label(),
            listeners = listeners.len(),
            "Tile finished"
        );
        for listener in listeners {
            listener.tile_loading_finished(job.request(), &outcome);
        }
    }
}

fn fail(job: &CachedFetchJob, error: FetchError, tile_size: u32) -> TileOutcome {
    if !job.transition(JobState::Failed) {
        return TileOutcome::Canceled;
    }
    warn!(tile = %job.request(), error = %error, "Tile failed");
    TileOutcome::failed(error.to_string(), tile_size)
}

async fn lookup(source: &Arc<dyn TileSource>, key: &CacheKey) -> Option<CachedTile> {
    let cache = Arc::clone(source.cache());
    let key = key.clone();
    tokio::task::spawn_blocking(move || {
        cache.exact_match(
            key.projection.as_ref(),
            key.pixels_per_unit,
            key.east,
            key.north,
            false,
        )
    })
    .await
    .ok()
    .flatten()
}

/// Turn a response into an outcome, storing what should be cached.
async fn complete(
    source: &Arc<dyn TileSource>,
    key: &CacheKey,
    url: &str,
    response: HttpResponse,
) -> Result<TileOutcome, FetchError> {
    let no_tile = source.no_tile_policy().is_no_tile(&response);
    if !no_tile && !response.is_success() {
        return Err(FetchError::Http {
            url: url.to_string(),
            status: response.status,
            message: describe_error(response.status, &response.body),
        });
    }

    let cache = Arc::clone(source.cache());
    let key = key.clone();
    let url = url.to_string();
    tokio::task::spawn_blocking(move || {
        let projection = key.projection.as_ref();
        if no_tile {
            debug!(url = %url, status = response.status, "Server has no tile");
            if let Err(e) = cache.store(
                TileData::NoTile,
                projection,
                key.pixels_per_unit,
                key.east,
                key.north,
            ) {
                warn!(url = %url, error = %e, "Failed to cache no-tile marker");
            }
            return Ok(TileOutcome::NoTileAtZoom);
        }

        let image = imaging::decode(&response.body).map_err(|e| FetchError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if let Err(e) = cache.store(
            TileData::Encoded(&response.body),
            projection,
            key.pixels_per_unit,
            key.east,
            key.north,
        ) {
            warn!(url = %url, error = %e, "Failed to cache tile");
        }
        Ok(TileOutcome::Loaded {
            image: Arc::new(image),
            from_cache: false,
        })
    })
    .await
    .map_err(|e| FetchError::Cache(e.to_string()))?
}
