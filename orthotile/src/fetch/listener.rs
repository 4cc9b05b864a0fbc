//! Tile outcomes and the listeners that receive them.

use std::sync::Arc;

use image::{DynamicImage, RgbaImage};

use crate::imaging::error_placeholder;
use crate::source::TileRequest;

/// How a tile request ended. Every listener of a job sees the same value.
#[derive(Debug, Clone)]
pub enum TileOutcome {
    Loaded {
        image: Arc<DynamicImage>,
        from_cache: bool,
    },
    /// The server has no imagery for this tile. Cached, never refetched.
    NoTileAtZoom,
    /// The tile failed; `placeholder` can be drawn in its place.
    Failed {
        message: String,
        placeholder: Arc<RgbaImage>,
    },
    /// Canceled before the fetch began. Not loaded, so a later request retries.
    Canceled,
}

impl TileOutcome {
    pub fn failed(message: impl Into<String>, tile_size: u32) -> Self {
        Self::Failed {
            message: message.into(),
            placeholder: error_placeholder(tile_size),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }

    pub fn image(&self) -> Option<&Arc<DynamicImage>> {
        match self {
            Self::Loaded { image, .. } => Some(image),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Loaded { from_cache: true, .. } => "cached",
            Self::Loaded { .. } => "loaded",
            Self::NoTileAtZoom => "no-tile",
            Self::Failed { .. } => "failed",
            Self::Canceled => "canceled",
        }
    }
}

/// Receives the outcome of a tile request.
///
/// Called from a runtime worker thread; implementations should hand the
/// result off rather than block.
pub trait TileListener: Send + Sync {
    fn tile_loading_finished(&self, request: &TileRequest, outcome: &TileOutcome);
}

impl<F> TileListener for F
where
    F: Fn(&TileRequest, &TileOutcome) + Send + Sync,
{
    fn tile_loading_finished(&self, request: &TileRequest, outcome: &TileOutcome) {
        self(request, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::PLACEHOLDER_COLOR;

    #[test]
    fn test_failed_carries_placeholder() {
        match TileOutcome::failed("boom", 32) {
            TileOutcome::Failed {
                message,
                placeholder,
            } => {
                assert_eq!(message, "boom");
                assert_eq!(placeholder.dimensions(), (32, 32));
                assert_eq!(*placeholder.get_pixel(0, 0), PLACEHOLDER_COLOR);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(TileOutcome::NoTileAtZoom.label(), "no-tile");
        assert_eq!(TileOutcome::Canceled.label(), "canceled");
        assert!(!TileOutcome::Canceled.is_loaded());
        assert!(TileOutcome::Canceled.image().is_none());
    }

    #[test]
    fn test_closure_listener() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let listener: Arc<dyn TileListener> = Arc::new(move |_: &TileRequest, _: &TileOutcome| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let request = TileRequest::new("src", 1, 2, 3);
        listener.tile_loading_finished(&request, &TileOutcome::NoTileAtZoom);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
