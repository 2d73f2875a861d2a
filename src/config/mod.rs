//! Application Configuration
//!
//! Preprocessing and engine settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Image preprocessing settings
    pub preprocess: PreprocessConfig,
    /// Recognition engine settings
    pub engine: EngineConfig,
    /// Text detection model settings
    pub detection: DetectionConfig,
    /// Text recognition model settings
    pub recognition: RecognitionConfig,
}

/// Image preprocessing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Images narrower than this are upscaled to this width
    pub min_width: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { min_width: 1200 }
    }
}

/// Recognition engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Language codes in order of preference; the first supported one is used
    pub languages: Vec<String>,
    /// Request GPU execution providers (ONNX Runtime falls back to CPU)
    pub use_gpu: bool,
    /// Merge adjacent lines into paragraph blocks
    pub paragraph: bool,
    /// Report recognizer confidence for individual lines
    pub confidence: bool,
    /// Recognized lines below this confidence are discarded (0.0 - 1.0)
    pub drop_score: f64,
    /// Model directory override (defaults to `<data dir>/models`)
    pub models_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            languages: vec!["en".to_string()],
            use_gpu: true,
            paragraph: true,
            confidence: true,
            drop_score: 0.5,
            models_dir: None,
        }
    }
}

/// How `limit_side_len` constrains the detection input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    /// Enlarge until the shorter side reaches the limit
    Min,
    /// Shrink until the longer side fits the limit
    Max,
}

/// DB text detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Side length the detection input is held to
    pub limit_side_len: u32,
    /// Whether `limit_side_len` is a floor on the shorter side or a cap on the longer one
    pub limit_type: LimitType,
    /// Hard cap on either side of the detection input
    pub max_side_limit: u32,
    /// Probability map binarization threshold
    pub threshold: f32,
    /// Minimum mean probability inside a box
    pub box_threshold: f32,
    /// Box expansion ratio
    pub unclip_ratio: f32,
    /// Maximum number of contours considered
    pub max_candidates: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            limit_side_len: 64,
            limit_type: LimitType::Min,
            max_side_limit: 4000,
            threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            max_candidates: 1000,
        }
    }
}

/// CRNN text recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Input height expected by the recognition model
    pub image_height: u32,
    /// Crops are padded to at least this width
    pub min_width: u32,
    /// Crops are never wider than this
    pub max_width: u32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            image_height: 48,
            min_width: 320,
            max_width: 3200,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.preprocess.min_width, 1200);

        assert_eq!(config.engine.languages, vec!["en".to_string()]);
        assert!(config.engine.use_gpu);
        assert!(config.engine.paragraph);
        assert!(config.engine.confidence);
        assert!((config.engine.drop_score - 0.5).abs() < 1e-9);
        assert!(config.engine.models_dir.is_none());

        assert_eq!(config.detection.limit_side_len, 64);
        assert_eq!(config.detection.limit_type, LimitType::Min);
        assert_eq!(config.detection.max_side_limit, 4000);
        assert!((config.detection.unclip_ratio - 1.5).abs() < 0.01);

        assert_eq!(config.recognition.image_height, 48);
        assert_eq!(config.recognition.min_width, 320);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.engine.models_dir = Some(PathBuf::from("/opt/models"));
        config.preprocess.min_width = 1600;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.preprocess.min_width, 1600);
        assert_eq!(parsed.engine.models_dir, Some(PathBuf::from("/opt/models")));
        assert_eq!(parsed.detection.max_candidates, config.detection.max_candidates);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[engine]\nuse_gpu = false\n").unwrap();

        assert!(!parsed.engine.use_gpu);
        assert!(parsed.engine.paragraph);
        assert_eq!(parsed.preprocess.min_width, 1200);
        assert_eq!(parsed.recognition.max_width, 3200);
    }

    #[test]
    fn test_detection_limit_type_parses_lowercase() {
        let parsed: AppConfig =
            toml::from_str("[detection]\nlimit_type = \"max\"\nlimit_side_len = 960\n").unwrap();

        assert_eq!(parsed.detection.limit_type, LimitType::Max);
        assert_eq!(parsed.detection.limit_side_len, 960);
        assert_eq!(parsed.detection.max_side_limit, 4000);

        assert!(toml::from_str::<AppConfig>("[detection]\nlimit_type = \"sideways\"\n").is_err());
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.engine.paragraph = false;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert!(!loaded.engine.paragraph);
        assert_eq!(loaded.engine.languages, config.engine.languages);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
