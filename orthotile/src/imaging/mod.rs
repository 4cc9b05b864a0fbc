//! Image format helpers shared by the parser, cache and fetch job.

mod placeholder;

pub use placeholder::{error_placeholder, PLACEHOLDER_COLOR};

use image::{DynamicImage, ImageFormat, ImageResult};

/// Maps an image MIME type to a decodable format.
///
/// Parameters after `;` are ignored, so `image/png; mode=8bit` is PNG.
///
/// # Example
///
/// ```
/// use image::ImageFormat;
/// use orthotile::imaging::format_from_mime;
///
/// assert_eq!(format_from_mime("image/jpeg"), Some(ImageFormat::Jpeg));
/// assert_eq!(format_from_mime("image/png; mode=8bit"), Some(ImageFormat::Png));
/// assert_eq!(format_from_mime("application/vnd.mapbox-vector-tile"), None);
/// ```
pub fn format_from_mime(mime: &str) -> Option<ImageFormat> {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match essence.as_str() {
        "image/png" | "image/png8" | "image/png24" | "image/png32" => Some(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
        "image/gif" => Some(ImageFormat::Gif),
        "image/webp" => Some(ImageFormat::WebP),
        "image/tiff" => Some(ImageFormat::Tiff),
        "image/bmp" => Some(ImageFormat::Bmp),
        _ => None,
    }
}

/// True if tiles in this MIME type can be decoded.
pub fn is_supported_mime(mime: &str) -> bool {
    format_from_mime(mime).is_some()
}

/// File extension used for cached tiles of a format.
pub fn extension_for(format: Option<ImageFormat>) -> &'static str {
    match format {
        Some(ImageFormat::Jpeg) => "jpg",
        Some(ImageFormat::Png) => "png",
        Some(ImageFormat::Gif) => "gif",
        Some(ImageFormat::WebP) => "webp",
        Some(ImageFormat::Tiff) => "tif",
        Some(ImageFormat::Bmp) => "bmp",
        _ => "dat",
    }
}

/// Sniffs the format of encoded image bytes.
pub fn sniff_format(data: &[u8]) -> Option<ImageFormat> {
    image::guess_format(data).ok()
}

/// Decodes tile bytes, sniffing the format from the data itself.
pub fn decode(data: &[u8]) -> ImageResult<DynamicImage> {
    image::load_from_memory(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    #[test]
    fn test_mime_mapping_ignores_case_and_parameters() {
        assert_eq!(format_from_mime("IMAGE/PNG"), Some(ImageFormat::Png));
        assert_eq!(format_from_mime(" image/jpg "), Some(ImageFormat::Jpeg));
        assert!(!is_supported_mime("text/html"));
    }

    #[test]
    fn test_extensions() {
        assert_eq!(extension_for(Some(ImageFormat::Jpeg)), "jpg");
        assert_eq!(extension_for(Some(ImageFormat::Png)), "png");
        assert_eq!(extension_for(None), "dat");
    }

    #[test]
    fn test_decode_sniffs_png() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        let bytes = bytes.into_inner();

        assert_eq!(sniff_format(&bytes), Some(ImageFormat::Png));
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.width(), 4);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(b"<html>not an image</html>").is_err());
        assert_eq!(sniff_format(b"nope"), None);
    }
}
