//! Scanshelf application binary - composition root.
//!
//! Ties the Scanshelf crates into a single executable:
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize logging
//! 3. Open storage (SQLite metadata + filesystem blobs)
//! 4. Pick the OCR engine
//! 5. Start the axum REST API server, or run a one-off extraction

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use scanshelf_core::config::ScanshelfConfig;
use scanshelf_core::progress::ProgressTracker;
use scanshelf_core::types::{OcrLanguage, PreprocessingOptions};
use scanshelf_ocr::{export, ExportFormat, ExportOptions, Extractor, MockOcrEngine, OcrEngine};
use scanshelf_ocr::TesseractCliEngine;
use scanshelf_storage::{Database, FilesystemBlobStore};

use scanshelf_api::routes;
use scanshelf_api::state::AppState;

use cli::{CliArgs, Command, ExtractArgs, ServeArgs};

/// Build the OCR engine named by `engine` ("tesseract" or "mock").
fn build_engine(engine: &str, config: &ScanshelfConfig) -> Arc<dyn OcrEngine> {
    match engine {
        "mock" => {
            tracing::warn!("Using mock OCR engine; extracted text is canned");
            Arc::new(MockOcrEngine::new())
        }
        _ => Arc::new(TesseractCliEngine::new(config.ocr.tesseract_path.clone())),
    }
}

/// Log filter priority: --log-level > RUST_LOG > config file.
fn init_tracing(cli_level: Option<String>, config_level: &str) {
    let filter = match cli_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config_level)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(
    mut config: ScanshelfConfig,
    args: ServeArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    config.general.port = args.resolve_port(config.general.port);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    let data_dir = config.data_dir();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = config.database_path();
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let blob_dir = config.blob_dir();
    std::fs::create_dir_all(&blob_dir)?;
    let blobs = Arc::new(FilesystemBlobStore::new(&blob_dir));
    tracing::info!(path = %blob_dir.display(), "Blob store ready");

    let engine = build_engine(&config.ocr.engine, &config);
    tracing::info!(engine = engine.name(), "OCR engine selected");

    let state = AppState::new(config.clone(), db, blobs, engine);

    if let Err(e) = routes::start_server(&config, state).await {
        tracing::error!(port = config.general.port, error = %e, "API server stopped");
        tracing::error!("Try: SCANSHELF_PORT={} scanshelf serve", config.general.port.saturating_add(1));
        return Err(e.into());
    }
    Ok(())
}

async fn extract(
    config: ScanshelfConfig,
    args: ExtractArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let language = match args.lang.as_deref() {
        Some(code) => code.parse::<OcrLanguage>()?,
        None => config.ocr.default_language,
    };
    let defaults = config.ocr.preprocessing;
    let options = PreprocessingOptions {
        grayscale: defaults.grayscale && !args.no_grayscale,
        contrast: defaults.contrast && !args.no_contrast,
        sharpen: defaults.sharpen && !args.no_sharpen,
    };
    let format: ExportFormat = args.format.parse()?;

    let image = std::fs::read(&args.image)?;
    let engine_name = args.engine.as_deref().unwrap_or(&config.ocr.engine);
    let extractor = Extractor::new(build_engine(engine_name, &config));

    let progress = ProgressTracker::new();
    let result = extractor
        .extract(&image, language, options, &progress)
        .await?;
    tracing::info!(
        chars = result.text.chars().count(),
        confidence = result.confidence,
        language = %result.language,
        "Extraction finished"
    );

    match args.output {
        Some(path) => {
            let rendered = export::render(&result.text, format, &ExportOptions::from(&config.export))?;
            std::fs::write(&path, &rendered.bytes)?;
            tracing::info!(path = %path.display(), format = %format, "Export written");
        }
        None => println!("{}", result.text),
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )
        .into());
    }
    ScanshelfConfig::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = if config_file.exists() {
        ScanshelfConfig::load(&config_file)?
    } else {
        ScanshelfConfig::default()
    };

    init_tracing(args.resolve_log_level(), &config.general.log_level);
    tracing::info!("Starting Scanshelf v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), exists = config_file.exists(), "Configuration resolved");

    match args.command {
        None => serve(config, ServeArgs::default()).await,
        Some(Command::Serve(serve_args)) => serve(config, serve_args).await,
        Some(Command::Extract(extract_args)) => extract(config, extract_args).await,
        Some(Command::InitConfig { force }) => init_config(&config_file, force),
    }
}
