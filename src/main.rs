//! ocr-service - single-shot image OCR
//!
//! Loads one image, upscales narrow inputs, converts to grayscale, runs
//! PaddleOCR models through ONNX Runtime and prints the detected text
//! spans as a JSON array on stdout.

mod config;
mod error;
mod output;
mod storage;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use image::GrayImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::AppConfig;
use crate::error::OcrResult;
use crate::output::OutputRecord;
use crate::vision::{ModelManager, OcrEngine, ReadOptions, TextReader};

const USAGE: &str = "Usage: ocr-service <IMAGE_PATH>";

/// ocr-service - print the text found in an image as JSON
#[derive(Parser, Debug)]
#[command(name = "ocr-service")]
#[command(about = "Detect and recognize text in an image and print it as JSON")]
struct Args {
    /// Image file to read
    image: Option<PathBuf>,

    /// Settings file (defaults to config.toml in the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the ONNX models and dictionary
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Do not request GPU acceleration
    #[arg(long)]
    cpu: bool,

    /// Report individual lines instead of merged paragraphs
    #[arg(long)]
    no_paragraph: bool,

    /// Leave per-line confidence out of the results (reported as 1.0)
    #[arg(long)]
    no_confidence: bool,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    force_utf8_console();

    let args = Args::parse();

    let Some(image_path) = args.image.clone() else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    init_logging(args.verbose)?;

    let config = load_config(&args)?;
    run(&config, &image_path)
}

/// Logs go to stderr; stdout carries only the JSON result
fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Switch the Windows console to the UTF-8 code page. Failure is ignored.
#[cfg(windows)]
fn force_utf8_console() {
    const CP_UTF8: u32 = 65001;
    // SAFETY: plain Win32 call with no pointer arguments
    let _ = unsafe { windows::Win32::System::Console::SetConsoleOutputCP(CP_UTF8) };
}

#[cfg(not(windows))]
fn force_utf8_console() {}

/// Load settings and apply command-line overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => load_default_config(),
    };

    if let Some(dir) = &args.models_dir {
        config.engine.models_dir = Some(dir.clone());
    }
    if args.cpu {
        config.engine.use_gpu = false;
    }
    if args.no_paragraph {
        config.engine.paragraph = false;
    }
    if args.no_confidence {
        config.engine.confidence = false;
    }

    Ok(config)
}

/// Load the user's config file if present, otherwise defaults
fn load_default_config() -> AppConfig {
    if let Ok(config_path) = storage::default_config_path() {
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => warn!("Ignoring invalid configuration {:?}: {:#}", config_path, e),
            }
        }
    }
    debug!("Using default configuration");
    AppConfig::default()
}

/// Preprocess, recognize, and print
fn run(config: &AppConfig, image_path: &Path) -> Result<()> {
    let image = vision::preprocess(image_path, &config.preprocess)?;

    let models = match &config.engine.models_dir {
        Some(dir) => ModelManager::with_dir(dir.clone())?,
        None => ModelManager::new()?,
    };
    debug!("Using models in {:?}", models.models_dir());

    let mut engine = OcrEngine::new(config, &models)?;
    debug!("Recognizing with language {:?}", engine.language());
    let options = ReadOptions {
        paragraph: config.engine.paragraph,
        detail: config.engine.confidence,
    };
    let records = recognize(&mut engine, &image, options)?;

    output::write_json(std::io::stdout().lock(), &records)
        .context("Failed to write results to stdout")?;
    Ok(())
}

/// Run a reader over the image and shape its output
fn recognize<R: TextReader>(
    reader: &mut R,
    image: &GrayImage,
    options: ReadOptions,
) -> OcrResult<Vec<OutputRecord>> {
    let detections = reader.read(image, options)?;
    let detection_count = detections.len();
    let records = output::format_detections(detections);
    info!("{} detections, {} records", detection_count, records.len());
    Ok(records)
}
