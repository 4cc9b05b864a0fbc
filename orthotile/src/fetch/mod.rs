//! Tile fetching.
//!
//! [`FetchDispatcher`] turns tile requests into [`CachedFetchJob`]s:
//! identical concurrent requests share one job, cached tiles are answered
//! without network access, and downloads run under per-protocol and
//! per-host limits. Outcomes reach callers through [`TileListener`]s.
//!
//! HTTP goes through the [`AsyncHttpClient`] trait so tests can substitute
//! a mock for [`ReqwestHttpClient`].

mod dispatcher;
mod error;
mod http;
mod job;
mod limiter;
mod listener;
mod policy;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{DispatcherConfig, DispatcherStats, FetchDispatcher, JobHandle};
pub use error::FetchError;
pub use http::{AsyncHttpClient, FetchTimeouts, HttpResponse, ReqwestHttpClient};
pub use job::{CachedFetchJob, JobState};
pub use limiter::{host_of, HostLimiter};
pub use listener::{TileListener, TileOutcome};
pub use policy::NoTilePolicy;

pub(crate) use policy::describe_error;
