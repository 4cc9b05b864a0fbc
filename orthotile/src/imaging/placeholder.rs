//! Magenta placeholder tile for failed loads.
//!
//! A tile that could not be fetched or decoded is shown as solid magenta
//! (255, 0, 255) so the gap is obvious instead of silently blank.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;

/// Fill colour of the placeholder.
pub const PLACEHOLDER_COLOR: Rgba<u8> = Rgba([255, 0, 255, 255]);

/// Placeholders are generated once per tile size and shared afterwards.
static PLACEHOLDERS: OnceLock<Mutex<HashMap<u32, Arc<RgbaImage>>>> = OnceLock::new();

/// Solid magenta tile of `size`×`size` pixels.
///
/// # Example
///
/// ```
/// use orthotile::imaging::{error_placeholder, PLACEHOLDER_COLOR};
///
/// let tile = error_placeholder(256);
/// assert_eq!(tile.dimensions(), (256, 256));
/// assert_eq!(*tile.get_pixel(0, 0), PLACEHOLDER_COLOR);
/// ```
pub fn error_placeholder(size: u32) -> Arc<RgbaImage> {
    let cache = PLACEHOLDERS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock();
    Arc::clone(
        cache
            .entry(size)
            .or_insert_with(|| Arc::new(RgbaImage::from_pixel(size, size, PLACEHOLDER_COLOR))),
    )
}
