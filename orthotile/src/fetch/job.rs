//! Fetch job lifecycle.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::listener::TileListener;
use crate::source::TileRequest;

/// Lifecycle of a [`CachedFetchJob`].
///
/// ```text
/// Created → Submitted → CacheHit → Success | NoTileAtZoom
///                     → Fetching → Success | NoTileAtZoom | Failed
///                     → Failed | Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Created,
    Submitted,
    CacheHit,
    Fetching,
    Success,
    NoTileAtZoom,
    Failed,
    Canceled,
}

impl JobState {
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Created, Submitted)
                | (Created, Canceled)
                | (Submitted, CacheHit)
                | (Submitted, Fetching)
                | (Submitted, Failed)
                | (Submitted, Canceled)
                | (CacheHit, Success)
                | (CacheHit, NoTileAtZoom)
                | (Fetching, Success)
                | (Fetching, NoTileAtZoom)
                | (Fetching, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Success | JobState::NoTileAtZoom | JobState::Failed | JobState::Canceled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Created => "created",
            JobState::Submitted => "submitted",
            JobState::CacheHit => "cache-hit",
            JobState::Fetching => "fetching",
            JobState::Success => "success",
            JobState::NoTileAtZoom => "no-tile",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// One fetch of one tile, shared by every request for the same tile while
/// it is in flight.
pub struct CachedFetchJob {
    request: TileRequest,
    state: Mutex<JobState>,
    cancel: CancellationToken,
    listeners: Mutex<Vec<Arc<dyn TileListener>>>,
}

impl fmt::Debug for CachedFetchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFetchJob")
            .field("request", &self.request)
            .field("state", &self.state())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl CachedFetchJob {
    pub(crate) fn new(request: TileRequest) -> Self {
        Self {
            request,
            state: Mutex::new(JobState::Created),
            cancel: CancellationToken::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn request(&self) -> &TileRequest {
        &self.request
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    /// Move to `next` if the lifecycle allows it. Returns false otherwise,
    /// which for a running job means it was canceled.
    pub(crate) fn transition(&self, next: JobState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            let from = *state;
            trace!(tile = %self.request, %from, to = %next, "Job transition");
            *state = next;
            true
        } else {
            false
        }
    }

    /// Cancel the job if it hasn't started fetching.
    ///
    /// Returns false when the fetch already began or the job finished; in
    /// that case the job runs to completion.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(JobState::Canceled) {
            *state = JobState::Canceled;
            self.cancel.cancel();
            true
        } else {
            false
        }
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn TileListener>) {
        self.listeners.lock().push(listener);
    }

    pub(crate) fn take_listeners(&self) -> Vec<Arc<dyn TileListener>> {
        std::mem::take(&mut *self.listeners.lock())
    }
}
