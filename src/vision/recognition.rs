//! Text recognition with a CRNN model
//!
//! Crops each detected quad out of the intensity image, rectifies it to a
//! horizontal strip and decodes the model output with greedy CTC.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use std::path::Path;

use super::detection::Quad;
use super::models::OnnxSession;
use super::tensor::{gray_to_nchw, REC_MEAN, REC_STD};
use crate::config::RecognitionConfig;
use crate::error::{OcrError, OcrResult};

/// Crops at least this much taller than wide are read as vertical text
const VERTICAL_RATIO: f32 = 1.5;

/// Character table for CTC decoding; class 0 is the blank
#[derive(Debug, Clone)]
pub struct Dictionary {
    symbols: Vec<String>,
}

impl Dictionary {
    /// Build from one symbol per line, every line taking a class, so class
    /// `i + 1` is line `i`. A trailing space symbol is appended.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut symbols: Vec<String> = lines
            .into_iter()
            .map(|line| line.trim_end_matches(['\r', '\n']).to_string())
            .collect();
        symbols.push(" ".to_string());
        Self { symbols }
    }

    /// Load a dictionary file
    pub fn load(path: &Path) -> OcrResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| OcrError::Model {
            model: "character dictionary",
            reason: format!("{}: {}", path.display(), e),
        })?;
        Ok(Self::from_lines(content.lines()))
    }

    fn symbol(&self, class: usize) -> Option<&str> {
        class
            .checked_sub(1)
            .and_then(|i| self.symbols.get(i))
            .map(String::as_str)
    }
}

/// Greedy CTC decoding of a `steps x classes` row-major probability matrix.
/// Returns the text and the mean probability of the emitted symbols.
pub fn ctc_decode(probs: &[f32], classes: usize, dictionary: &Dictionary) -> (String, f64) {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = None;

    if classes == 0 {
        return (text, 0.0);
    }

    for step in probs.chunks_exact(classes) {
        let (class, prob) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        if class != 0 && previous != Some(class) {
            if let Some(symbol) = dictionary.symbol(class) {
                text.push_str(symbol);
                scores.push(prob as f64);
            }
        }
        previous = Some(class);
    }

    let confidence = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };
    (text, confidence)
}

/// Rectify the quad to an upright strip
pub fn crop_quad(image: &GrayImage, quad: &Quad) -> GrayImage {
    let dist = |a: (f32, f32), b: (f32, f32)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();
    let width = dist(quad[0], quad[1]).max(dist(quad[2], quad[3])).round().max(1.0);
    let height = dist(quad[0], quad[3]).max(dist(quad[1], quad[2])).round().max(1.0);

    let target = [(0.0, 0.0), (width, 0.0), (width, height), (0.0, height)];
    let crop = match Projection::from_control_points(*quad, target) {
        Some(projection) => {
            let mut out = GrayImage::new(width as u32, height as u32);
            warp_into(image, &projection, Interpolation::Bicubic, Luma([0]), &mut out);
            out
        }
        None => axis_aligned_crop(image, quad),
    };

    if crop.height() as f32 >= crop.width() as f32 * VERTICAL_RATIO {
        imageops::rotate270(&crop)
    } else {
        crop
    }
}

fn axis_aligned_crop(image: &GrayImage, quad: &Quad) -> GrayImage {
    let min_x = quad.iter().map(|p| p.0).fold(f32::INFINITY, f32::min).max(0.0) as u32;
    let min_y = quad.iter().map(|p| p.1).fold(f32::INFINITY, f32::min).max(0.0) as u32;
    let max_x = quad.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max).max(0.0) as u32;
    let max_y = quad.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max).max(0.0) as u32;
    let width = max_x.saturating_sub(min_x).max(1);
    let height = max_y.saturating_sub(min_y).max(1);
    imageops::crop_imm(image, min_x, min_y, width, height).to_image()
}

/// Resize to the model height keeping the aspect ratio.
/// Returns the strip and the padded tensor width.
pub fn resize_for_recognition(crop: &GrayImage, config: &RecognitionConfig) -> (GrayImage, u32) {
    let (width, height) = crop.dimensions();
    let ratio = width as f32 / height.max(1) as f32;
    let resized_w = ((config.image_height as f32 * ratio).ceil() as u32).clamp(1, config.max_width);

    let resized = imageops::resize(crop, resized_w, config.image_height, FilterType::Triangle);
    (resized, resized_w.max(config.min_width))
}

/// CRNN text recognizer
pub struct TextRecognizer {
    session: OnnxSession,
    dictionary: Dictionary,
    config: RecognitionConfig,
}

impl TextRecognizer {
    pub fn new(session: OnnxSession, dictionary: Dictionary, config: RecognitionConfig) -> Self {
        Self {
            session,
            dictionary,
            config,
        }
    }

    /// Read the text inside one detected box
    pub fn recognize(&mut self, image: &GrayImage, quad: &Quad) -> OcrResult<(String, f64)> {
        let crop = crop_quad(image, quad);
        let (strip, padded_width) = resize_for_recognition(&crop, &self.config);
        let input = gray_to_nchw(&strip, padded_width, &REC_MEAN, &REC_STD);

        let output = self.session.run(input)?;
        let shape = output.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[2] < 2 {
            return Err(OcrError::InvalidOutput {
                model: self.session.name(),
                reason: format!("expected [1, T, C], got {:?}", shape),
            });
        }

        let probs: Vec<f32> = output.iter().copied().collect();
        Ok(ctc_decode(&probs, shape[2], &self.dictionary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn one_hot(class: usize, prob: f32, classes: usize) -> Vec<f32> {
        let rest = (1.0 - prob) / (classes - 1) as f32;
        (0..classes).map(|i| if i == class { prob } else { rest }).collect()
    }

    #[test]
    fn test_dictionary_appends_space() {
        let dict = Dictionary::from_lines(["a", "b"]);
        assert_eq!(dict.symbols.len(), 3);
        assert_eq!(dict.symbol(0), None);
        assert_eq!(dict.symbol(1), Some("a"));
        assert_eq!(dict.symbol(3), Some(" "));
        assert_eq!(dict.symbol(4), None);
    }

    #[test]
    fn test_dictionary_blank_line_keeps_class_indices() {
        let dict = Dictionary::from_lines(["a", "", "b"]);
        assert_eq!(dict.symbols.len(), 4);
        assert_eq!(dict.symbol(2), Some(""));
        assert_eq!(dict.symbol(3), Some("b"));
        assert_eq!(dict.symbol(4), Some(" "));

        let probs: Vec<f32> = [3, 0, 1].iter().flat_map(|&c| one_hot(c, 0.9, 5)).collect();
        assert_eq!(ctc_decode(&probs, 5, &dict).0, "ba");
    }

    #[test]
    fn test_dictionary_load() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "x\r\ny\nü\n").unwrap();

        let dict = Dictionary::load(file.path()).unwrap();
        assert_eq!(dict.symbols.len(), 4);
        assert_eq!(dict.symbol(3), Some("ü"));
    }

    #[test]
    fn test_dictionary_missing_file() {
        assert!(matches!(
            Dictionary::load(Path::new("/nonexistent/dict.txt")),
            Err(OcrError::Model { .. })
        ));
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        // classes: blank, a, b, space
        let dict = Dictionary::from_lines(["a", "b"]);
        let steps = [(1, 0.9), (1, 0.8), (0, 0.9), (1, 0.7), (2, 0.6), (3, 0.5)];
        let probs: Vec<f32> = steps.iter().flat_map(|&(c, p)| one_hot(c, p, 4)).collect();

        let (text, confidence) = ctc_decode(&probs, 4, &dict);

        assert_eq!(text, "aab ");
        let expected = (0.9f32 as f64 + 0.7f32 as f64 + 0.6f32 as f64 + 0.5f32 as f64) / 4.0;
        assert!((confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn test_ctc_all_blank_is_empty() {
        let dict = Dictionary::from_lines(["a"]);
        let probs: Vec<f32> = (0..5).flat_map(|_| one_hot(0, 0.99, 3)).collect();

        assert_eq!(ctc_decode(&probs, 3, &dict), (String::new(), 0.0));
    }

    #[test]
    fn test_crop_quad_axis_aligned() {
        let mut image = GrayImage::new(100, 50);
        for y in 10..30 {
            for x in 10..50 {
                image.put_pixel(x, y, Luma([255]));
            }
        }
        let quad: Quad = [(10.0, 10.0), (50.0, 10.0), (50.0, 30.0), (10.0, 30.0)];

        let crop = crop_quad(&image, &quad);
        assert_eq!(crop.dimensions(), (40, 20));
        assert!(crop.get_pixel(20, 10).0[0] > 200);
    }

    #[test]
    fn test_crop_quad_rotates_vertical_text() {
        let image = GrayImage::new(100, 100);
        let quad: Quad = [(10.0, 10.0), (20.0, 10.0), (20.0, 40.0), (10.0, 40.0)];

        let crop = crop_quad(&image, &quad);
        assert_eq!(crop.dimensions(), (30, 10));
    }

    #[test]
    fn test_resize_for_recognition() {
        let config = RecognitionConfig::default();

        let (strip, padded) = resize_for_recognition(&GrayImage::new(200, 20), &config);
        assert_eq!(strip.dimensions(), (480, 48));
        assert_eq!(padded, 480);

        let (strip, padded) = resize_for_recognition(&GrayImage::new(20, 20), &config);
        assert_eq!(strip.dimensions(), (48, 48));
        assert_eq!(padded, 320);

        let (strip, _) = resize_for_recognition(&GrayImage::new(10_000, 10), &config);
        assert_eq!(strip.width(), config.max_width);
    }
}
