//! OCR engine
//!
//! Detection, recognition and paragraph merging behind [`TextReader`].

use image::GrayImage;
use std::time::Instant;
use tracing::{debug, info};

use super::detection::TextDetector;
use super::models::{Language, ModelManager, ModelType, OnnxSession};
use super::paragraph::merge_paragraphs;
use super::recognition::{Dictionary, TextRecognizer};
use super::{Detection, ReadOptions, TextLine, TextReader};
use crate::config::AppConfig;
use crate::error::OcrResult;

/// OCR engine using PaddleOCR via ONNX Runtime
pub struct OcrEngine {
    detector: TextDetector,
    recognizer: TextRecognizer,
    language: Language,
    drop_score: f64,
}

impl OcrEngine {
    /// Load the models for the first supported configured language,
    /// downloading them if needed
    pub fn new(config: &AppConfig, models: &ModelManager) -> OcrResult<Self> {
        let start = Instant::now();
        let language = Language::select(&config.engine.languages)?;
        let use_gpu = config.engine.use_gpu;

        let det_path = models.ensure_model(ModelType::Detection)?;
        let rec_path = models.ensure_model(ModelType::Recognition(language))?;
        let dict_path = models.ensure_model(ModelType::Dictionary(language))?;

        let detector = TextDetector::new(
            OnnxSession::new("text detection model", &det_path, use_gpu)?,
            config.detection.clone(),
        );
        let recognizer = TextRecognizer::new(
            OnnxSession::new("text recognition model", &rec_path, use_gpu)?,
            Dictionary::load(&dict_path)?,
            config.recognition.clone(),
        );

        info!(
            "OCR engine ready (language: {}) in {:?}",
            language.code(),
            start.elapsed()
        );

        Ok(Self {
            detector,
            recognizer,
            language,
            drop_score: config.engine.drop_score,
        })
    }

    /// Language the recognizer was loaded for
    pub fn language(&self) -> Language {
        self.language
    }

    /// Detect and recognize every text line
    fn read_lines(&mut self, image: &GrayImage) -> OcrResult<Vec<TextLine>> {
        let boxes = self.detector.detect(image)?;
        let mut lines = Vec::with_capacity(boxes.len());

        for quad in boxes {
            let (text, confidence) = self.recognizer.recognize(image, &quad)?;
            lines.push(TextLine {
                quad,
                text,
                confidence,
            });
        }

        Ok(lines)
    }
}

/// Drop blank and low-confidence lines, then shape the rest as requested
fn lines_to_detections(lines: Vec<TextLine>, drop_score: f64, options: ReadOptions) -> Vec<Detection> {
    let kept: Vec<TextLine> = lines
        .into_iter()
        .filter(|line| {
            let keep = !line.text.trim().is_empty() && line.confidence >= drop_score;
            if !keep {
                debug!("Dropping line {:?} ({:.3})", line.text, line.confidence);
            }
            keep
        })
        .collect();

    if options.paragraph {
        return merge_paragraphs(kept);
    }

    kept.into_iter()
        .map(|line| {
            let mut detection = Detection::from(line);
            if !options.detail {
                detection.confidence = None;
            }
            detection
        })
        .collect()
}

impl TextReader for OcrEngine {
    fn read(&mut self, image: &GrayImage, options: ReadOptions) -> OcrResult<Vec<Detection>> {
        let start = Instant::now();
        let lines = self.read_lines(image)?;
        let line_count = lines.len();

        let detections = lines_to_detections(lines, self.drop_score, options);

        debug!(
            "Read {} lines into {} detections in {:?}",
            line_count,
            detections.len(),
            start.elapsed()
        );

        Ok(detections)
    }
}
