//! Image preprocessing ahead of OCR
//!
//! Decodes the input, upscales narrow images so small glyphs survive
//! detection, and reduces the result to a single intensity channel.
//! Deliberately minimal: no thresholding, denoising or morphology.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use std::path::Path;
use tracing::debug;

use crate::config::PreprocessConfig;
use crate::error::{OcrError, OcrResult};

/// Load an image and prepare it for recognition
pub fn preprocess(path: &Path, config: &PreprocessConfig) -> OcrResult<GrayImage> {
    let color = load_color(path)?;
    let color = upscale_if_needed(color, config.min_width);
    Ok(to_grayscale(&color))
}

/// Decode a file as an 8-bit RGB image
pub fn load_color(path: &Path) -> OcrResult<RgbImage> {
    let img = image::open(path).map_err(|source| OcrError::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Decoded {:?}: {}x{}", path, img.width(), img.height());
    Ok(img.to_rgb8())
}

/// Upscale so the width reaches `min_width`, keeping the aspect ratio.
/// Images already at least `min_width` wide are returned unchanged.
pub fn upscale_if_needed(img: RgbImage, min_width: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    if width == 0 || width >= min_width {
        return img;
    }

    let (new_width, new_height) = scaled_dimensions(width, height, min_width);
    debug!(
        "Upscaling {}x{} -> {}x{} (min width {})",
        width, height, new_width, new_height, min_width
    );
    imageops::resize(&img, new_width, new_height, FilterType::CatmullRom)
}

/// Dimensions after scaling `width` up to `min_width`
fn scaled_dimensions(width: u32, height: u32, min_width: u32) -> (u32, u32) {
    let scale = min_width as f64 / width as f64;
    let new_width = (width as f64 * scale).round().max(1.0) as u32;
    let new_height = (height as f64 * scale).round().max(1.0) as u32;
    (new_width, new_height)
}

/// Convert RGB to single-channel intensity with BT.601 luma weights
pub fn to_grayscale(img: &RgbImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut gray = GrayImage::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let value = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        gray.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
    }

    gray
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    #[test]
    fn test_wide_image_passes_through() {
        for width in [1200, 1201, 2000] {
            let img = upscale_if_needed(solid(width, 37, [10, 20, 30]), 1200);
            assert_eq!(img.dimensions(), (width, 37));
        }
    }

    #[test]
    fn test_narrow_image_is_upscaled_to_min_width() {
        for (width, height) in [(1, 1), (3, 7), (600, 400), (799, 333), (1199, 10)] {
            let img = upscale_if_needed(solid(width, height, [200, 200, 200]), 1200);
            let scale = 1200.0 / width as f64;
            let expected_height = (height as f64 * scale).round() as i64;

            assert!((img.width() as i64 - 1200).abs() <= 1, "width {}", img.width());
            assert!((img.height() as i64 - expected_height).abs() <= 1);
        }
    }

    #[test]
    fn test_scaled_dimensions_keep_aspect() {
        assert_eq!(scaled_dimensions(600, 400, 1200), (1200, 800));
        assert_eq!(scaled_dimensions(400, 100, 1200), (1200, 300));
    }

    #[test]
    fn test_grayscale_luma_weights() {
        let mut img = RgbImage::new(4, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));
        img.put_pixel(3, 0, Rgb([128, 128, 128]));

        let gray = to_grayscale(&img);

        // 0.299 * 255 = 76.245
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        // 0.587 * 255 = 149.685
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        // 0.114 * 255 = 29.07
        assert_eq!(gray.get_pixel(2, 0).0[0], 29);
        assert_eq!(gray.get_pixel(3, 0).0[0], 128);
    }

    #[test]
    fn test_preprocess_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.png");
        solid(300, 150, [255, 255, 255]).save(&path).unwrap();

        let gray = preprocess(&path, &PreprocessConfig::default()).unwrap();
        assert_eq!(gray.dimensions(), (1200, 600));
        assert_eq!(gray.get_pixel(600, 300).0[0], 255);
    }

    #[test]
    fn test_preprocess_respects_configured_min_width() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.png");
        solid(300, 150, [0, 0, 0]).save(&path).unwrap();

        let gray = preprocess(&path, &PreprocessConfig { min_width: 600 }).unwrap();
        assert_eq!(gray.dimensions(), (600, 300));
    }

    #[test]
    fn test_missing_file_is_image_load_error() {
        let err = preprocess(Path::new("/nonexistent/image.png"), &PreprocessConfig::default()).unwrap_err();
        match err {
            OcrError::ImageLoad { path, .. } => {
                assert_eq!(path, Path::new("/nonexistent/image.png"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_corrupt_file_is_image_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        assert!(matches!(preprocess(&path, &PreprocessConfig::default()), Err(OcrError::ImageLoad { .. })));
    }
}
