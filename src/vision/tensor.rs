//! Tensor conversion for the PaddleOCR models
//!
//! Turns grayscale crops into normalized NCHW tensors. The models expect
//! three channels, so the intensity plane is replicated.

use image::GrayImage;
use ndarray::Array4;

/// ImageNet statistics used by the detection model
pub const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Recognition model maps [0, 255] -> [-1, 1]
pub const REC_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const REC_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Convert a grayscale image to a (1, 3, H, padded_width) tensor.
/// Columns beyond the image width are zero padded.
pub fn gray_to_nchw(
    image: &GrayImage,
    padded_width: u32,
    mean: &[f32; 3],
    std: &[f32; 3],
) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let padded_width = padded_width.max(width) as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, padded_width));

    for (x, y, pixel) in image.enumerate_pixels() {
        let value = pixel.0[0] as f32 / 255.0;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (value - mean[c]) / std[c];
        }
    }

    tensor
}

/// Round to the nearest multiple of 32, never below 32
pub fn round_to_32(value: f32) -> u32 {
    ((value / 32.0).round() as u32).max(1) * 32
}
