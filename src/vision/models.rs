//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of PaddleOCR models.

use anyhow::Context;
use futures_util::StreamExt;
use ndarray::{Array4, ArrayD};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Tensor;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::error::{OcrError, OcrResult};

/// Environment variable that forbids model downloads
pub const OFFLINE_ENV: &str = "OCR_SERVICE_OFFLINE";

/// Recognition language with a published PaddleOCR model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
}

impl Language {
    /// Parse a language code such as "en"
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" | "eng" | "english" => Some(Language::English),
            _ => None,
        }
    }

    /// Pick the first supported language from a preference list
    pub fn select(codes: &[String]) -> OcrResult<Self> {
        codes
            .iter()
            .find_map(|code| Self::from_code(code))
            .ok_or_else(|| OcrError::UnsupportedLanguage(codes.to_vec()))
    }

    /// Short code, used in file names
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
        }
    }

    /// Directory name in the model repository
    fn repo_dir(&self) -> &'static str {
        match self {
            Language::English => "english",
        }
    }
}

/// Model identifier for PaddleOCR components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet), language independent
    Detection,
    /// Text recognition model (CRNN)
    Recognition(Language),
    /// Character dictionary for recognition
    Dictionary(Language),
}

impl ModelType {
    /// Get the filename for this model type
    pub fn filename(&self) -> String {
        match self {
            ModelType::Detection => "det.onnx".to_string(),
            ModelType::Recognition(lang) => format!("rec_{}.onnx", lang.code()),
            ModelType::Dictionary(lang) => format!("dict_{}.txt", lang.code()),
        }
    }

    /// Get the download URL for this model
    /// Using PaddleOCR models from Hugging Face (monkt/paddleocr-onnx)
    pub fn download_url(&self) -> String {
        const BASE: &str = "https://huggingface.co/monkt/paddleocr-onnx/resolve/main";
        match self {
            ModelType::Detection => format!("{}/detection/v3/det.onnx", BASE),
            ModelType::Recognition(lang) => format!("{}/languages/{}/rec.onnx", BASE, lang.repo_dir()),
            ModelType::Dictionary(lang) => format!("{}/languages/{}/dict.txt", BASE, lang.repo_dir()),
        }
    }

    /// Expected file size for integrity check (approximate, in bytes)
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (2_000_000, 5_000_000),       // ~2.43 MB
            ModelType::Recognition(_) => (7_000_000, 10_000_000), // ~7.83 MB
            ModelType::Dictionary(_) => (500, 10_000),            // ~1.42 KB
        }
    }

    /// Display name for log messages
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "text detection model",
            ModelType::Recognition(_) => "text recognition model",
            ModelType::Dictionary(_) => "character dictionary",
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create a model manager rooted in the per-user data directory
    pub fn new() -> anyhow::Result<Self> {
        let models_dir = crate::storage::get_data_dir()?.join("models");
        Self::with_dir(models_dir)
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self { models_dir })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Check if a model is present with a plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        match std::fs::metadata(self.model_path(model_type)) {
            Ok(metadata) => {
                let (min, max) = model_type.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    /// Return the path to a model, downloading it first if needed
    pub fn ensure_model(&self, model_type: ModelType) -> OcrResult<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("{:?} available at {:?}", model_type, path);
            return Ok(path);
        }

        let url = model_type.download_url();
        if std::env::var_os(OFFLINE_ENV).is_some() {
            return Err(OcrError::Download {
                url,
                reason: format!(
                    "offline mode; download it manually and place it at {}",
                    path.display()
                ),
            });
        }

        self.download_model(model_type).map_err(|e| OcrError::Download {
            url,
            reason: format!("{:#}", e),
        })?;

        Ok(path)
    }

    /// Download a specific model (blocking)
    fn download_model(&self, model_type: ModelType) -> anyhow::Result<()> {
        let url = model_type.download_url();
        let path = self.model_path(model_type);

        info!("Downloading {} from {}", model_type.display_name(), url);

        // Create a tokio runtime for async download
        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let hash = rt.block_on(download_file(&url, &path))?;

        if !self.is_model_available(model_type) {
            let _ = std::fs::remove_file(&path);
            anyhow::bail!("Download completed but the file size is outside the expected range");
        }

        self.update_manifest_for_model(model_type, hash)?;

        info!("Downloaded {} to {:?}", model_type.display_name(), path);
        Ok(())
    }

    /// Record a downloaded model in the manifest
    fn update_manifest_for_model(&self, model_type: ModelType, sha256: String) -> anyhow::Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_else(|e| {
            warn!("Ignoring unreadable model manifest: {:#}", e);
            ModelManifest::default()
        });

        let metadata = std::fs::metadata(self.model_path(model_type))?;
        let model_info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename(),
            size_bytes: metadata.len(),
            sha256,
            downloaded_at: unix_now(),
        };

        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    fn manifest_path(&self) -> PathBuf {
        self.models_dir.join("manifest.json")
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> anyhow::Result<ModelManifest> {
        let manifest_path = self.manifest_path();
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.manifest_path(), content)?;
        Ok(())
    }
}

/// Stream a URL into `path` through a temp file. Returns the SHA-256 hex digest.
async fn download_file(url: &str, path: &Path) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}", response.status());
    }

    debug!("Download size: {:?} bytes", response.content_length());

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);

    std::fs::rename(&temp_path, path)
        .context("Failed to move downloaded file to final location")?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// ONNX Runtime session with a single image input
pub struct OnnxSession {
    session: Session,
    name: &'static str,
    input_name: String,
    output_name: String,
}

impl OnnxSession {
    /// Load a model, optionally requesting GPU acceleration
    pub fn new(name: &'static str, model_path: &Path, use_gpu: bool) -> OcrResult<Self> {
        info!("Loading {} from {:?} (gpu requested: {})", name, model_path, use_gpu);

        let load_error = |e: ort::Error| OcrError::Model {
            model: name,
            reason: e.to_string(),
        };

        let builder = base_builder().map_err(load_error)?;
        let builder = if use_gpu {
            with_gpu(builder).map_err(load_error)?
        } else {
            builder
        };

        let session = builder.commit_from_file(model_path).map_err(load_error)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| OcrError::Model {
                model: name,
                reason: "model has no inputs".to_string(),
            })?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| OcrError::Model {
                model: name,
                reason: "model has no outputs".to_string(),
            })?;

        debug!("{} loaded. Input: {}, output: {}", name, input_name, output_name);

        Ok(Self {
            session,
            name,
            input_name,
            output_name,
        })
    }

    /// Model name used in errors
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the model on one NCHW tensor and return its first output
    pub fn run(&mut self, input: Array4<f32>) -> OcrResult<ArrayD<f32>> {
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])?;
        let output = outputs[self.output_name.as_str()].try_extract_array::<f32>()?;
        Ok(output.to_owned())
    }
}

fn base_builder() -> ort::Result<SessionBuilder> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)
}

/// Register the platform GPU provider. ONNX Runtime silently keeps the
/// CPU provider when the GPU one cannot be initialized.
fn with_gpu(builder: SessionBuilder) -> ort::Result<SessionBuilder> {
    #[cfg(target_os = "windows")]
    let provider = ort::execution_providers::DirectMLExecutionProvider::default().build();
    #[cfg(not(target_os = "windows"))]
    let provider = ort::execution_providers::CUDAExecutionProvider::default().build();

    match builder.with_execution_providers([provider]) {
        Ok(builder) => Ok(builder),
        Err(e) => {
            warn!("GPU execution provider not available, using CPU: {}", e);
            base_builder()
        }
    }
}

/// Seconds since the Unix epoch
fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
