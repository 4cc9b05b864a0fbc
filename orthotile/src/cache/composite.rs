//! Drawing cached tiles of neighbouring scales onto a requested tile.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};

/// A cached tile to be drawn, with its own scale and south-west origin.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    pub pixels_per_unit: f64,
    pub east: f64,
    pub north: f64,
}

/// Scale `image` to the canvas resolution and draw it at its projected
/// position relative to the canvas origin `(east, north)`.
///
/// Returns false when the scaled image would be smaller than one pixel.
pub(crate) fn draw_scaled(
    canvas: &mut RgbaImage,
    image: &DynamicImage,
    pixels_per_unit: f64,
    east: f64,
    north: f64,
    placement: Placement,
) -> bool {
    let tile_size = f64::from(canvas.width());
    let size = (pixels_per_unit / placement.pixels_per_unit * tile_size).round();
    if size < 1.0 {
        return false;
    }

    let x = ((placement.east - east) * pixels_per_unit).round() as i64;
    let y = (tile_size - size - (placement.north - north) * pixels_per_unit).round() as i64;

    let scaled = imageops::resize(&image.to_rgba8(), size as u32, size as u32, FilterType::Triangle);
    imageops::overlay(canvas, &scaled, x, y);
    true
}
