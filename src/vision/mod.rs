//! Vision/OCR Layer
//!
//! Preprocesses the input image and extracts text with PaddleOCR models
//! running on ONNX Runtime.

pub mod detection;
pub mod engine;
pub mod models;
pub mod paragraph;
pub mod preprocess;
pub mod recognition;
pub mod tensor;

use image::GrayImage;

use crate::error::OcrResult;

pub use engine::OcrEngine;
pub use models::ModelManager;
pub use preprocess::preprocess;

/// Text located by the recognition engine
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Bounding polygon, usually four corners
    pub polygon: Vec<(f32, f32)>,
    /// Recognized text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0), if the engine reported one
    pub confidence: Option<f64>,
}

/// A single recognized line before paragraph merging
#[derive(Debug, Clone)]
pub struct TextLine {
    pub quad: detection::Quad,
    pub text: String,
    pub confidence: f64,
}

impl From<TextLine> for Detection {
    fn from(line: TextLine) -> Self {
        Self {
            polygon: line.quad.to_vec(),
            text: line.text,
            confidence: Some(line.confidence),
        }
    }
}

/// How a read should be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Merge adjacent lines into paragraph blocks
    pub paragraph: bool,
    /// Report per-line confidence scores
    pub detail: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            paragraph: true,
            detail: true,
        }
    }
}

/// Anything that can turn an intensity image into detections
pub trait TextReader {
    fn read(&mut self, image: &GrayImage, options: ReadOptions) -> OcrResult<Vec<Detection>>;
}
