use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ScanshelfError};
use crate::types::{OcrLanguage, PreprocessingOptions};

/// Default upload cap: 100 MiB.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;

/// Top-level configuration for Scanshelf.
///
/// Loaded from `~/.scanshelf/config.toml` by default. Every section falls back
/// to its defaults when missing from the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanshelfConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl ScanshelfConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScanshelfConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the rest of the system cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.upload.max_file_bytes == 0 {
            return Err(ScanshelfError::Config(
                "upload.max_file_bytes must be greater than 0".into(),
            ));
        }
        if self.export.columns < 10 {
            return Err(ScanshelfError::Config(
                "export.columns must be at least 10".into(),
            ));
        }
        if self.export.lines_per_page == 0 {
            return Err(ScanshelfError::Config(
                "export.lines_per_page must be greater than 0".into(),
            ));
        }
        if !matches!(self.ocr.engine.as_str(), "tesseract" | "mock") {
            return Err(ScanshelfError::Config(format!(
                "ocr.engine must be 'tesseract' or 'mock', got '{}'",
                self.ocr.engine
            )));
        }
        Ok(())
    }

    /// Data directory with a leading `~` expanded against `$HOME`.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }

    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("scanshelf.db")
    }

    /// Root directory for stored blobs. Relative paths resolve under the data directory.
    pub fn blob_dir(&self) -> PathBuf {
        let blob_dir = expand_home(&self.upload.blob_dir);
        if blob_dir.is_absolute() {
            blob_dir
        } else {
            self.data_dir().join(blob_dir)
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database and blobs.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// API server port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.scanshelf/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
        }
    }
}

/// Upload intake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted file, inclusive.
    pub max_file_bytes: u64,
    /// Blob directory, relative to the data directory unless absolute.
    pub blob_dir: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            blob_dir: "blobs".to_string(),
        }
    }
}

/// OCR engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// OCR engine: "tesseract" or "mock".
    pub engine: String,
    /// Path or name of the tesseract executable.
    pub tesseract_path: String,
    pub default_language: OcrLanguage,
    pub preprocessing: PreprocessingOptions,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: "tesseract".to_string(),
            tesseract_path: "tesseract".to_string(),
            default_language: OcrLanguage::English,
            preprocessing: PreprocessingOptions::default(),
        }
    }
}

/// Text export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Characters per line before wrapping.
    pub columns: usize,
    /// Lines per PDF page.
    pub lines_per_page: usize,
    /// PDF font size in points.
    pub font_size: f32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            columns: 85,
            lines_per_page: 52,
            font_size: 12.0,
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Maximum requests per second, per user, across rate-limited routes.
    pub rate_limit_per_sec: u64,
    /// Capacity of the comment broadcast channel.
    pub comment_channel_capacity: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 100,
            comment_channel_capacity: 256,
        }
    }
}
