//! Error types for the OCR pipeline

use std::path::PathBuf;

/// Fatal failures of the preprocessing and recognition stages
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// The input image could not be opened or decoded
    #[error("Could not load image from: {}", path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// None of the requested languages has a recognition model
    #[error("No supported recognition language in {0:?}")]
    UnsupportedLanguage(Vec<String>),

    /// A model file is missing, invalid, or failed to load
    #[error("Failed to load {model}: {reason}")]
    Model { model: &'static str, reason: String },

    /// ONNX Runtime failed while building a tensor or running a session
    #[error("Inference failed: {0}")]
    Inference(#[from] ort::Error),

    /// A model produced output of an unexpected shape
    #[error("Unexpected {model} output: {reason}")]
    InvalidOutput { model: &'static str, reason: String },

    /// A model download failed
    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },
}

pub type OcrResult<T> = std::result::Result<T, OcrError>;
