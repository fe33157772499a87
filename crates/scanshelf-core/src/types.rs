use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScanshelfError;

// =============================================================================
// Enums
// =============================================================================

/// Languages the OCR engine is asked to recognize.
///
/// Serialized as the Tesseract language code (`eng`, `chi_sim`, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcrLanguage {
    #[default]
    #[serde(rename = "eng")]
    English,
    #[serde(rename = "fra")]
    French,
    #[serde(rename = "deu")]
    German,
    #[serde(rename = "spa")]
    Spanish,
    #[serde(rename = "chi_sim")]
    ChineseSimplified,
    #[serde(rename = "jpn")]
    Japanese,
}

impl OcrLanguage {
    pub const ALL: [OcrLanguage; 6] = [
        OcrLanguage::English,
        OcrLanguage::French,
        OcrLanguage::German,
        OcrLanguage::Spanish,
        OcrLanguage::ChineseSimplified,
        OcrLanguage::Japanese,
    ];

    /// Tesseract language code.
    pub fn code(&self) -> &'static str {
        match self {
            OcrLanguage::English => "eng",
            OcrLanguage::French => "fra",
            OcrLanguage::German => "deu",
            OcrLanguage::Spanish => "spa",
            OcrLanguage::ChineseSimplified => "chi_sim",
            OcrLanguage::Japanese => "jpn",
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            OcrLanguage::English => "English",
            OcrLanguage::French => "French",
            OcrLanguage::German => "German",
            OcrLanguage::Spanish => "Spanish",
            OcrLanguage::ChineseSimplified => "Chinese (Simplified)",
            OcrLanguage::Japanese => "Japanese",
        }
    }
}

impl fmt::Display for OcrLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for OcrLanguage {
    type Err = ScanshelfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OcrLanguage::ALL
            .iter()
            .copied()
            .find(|lang| lang.code() == s)
            .ok_or_else(|| {
                ScanshelfError::Validation(format!(
                    "Unsupported language '{}'. Must be one of: eng, fra, deu, spa, chi_sim, jpn",
                    s
                ))
            })
    }
}

/// Long-running operations a user can have in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Extraction,
    Upload,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Extraction => write!(f, "extraction"),
            OperationKind::Upload => write!(f, "upload"),
        }
    }
}

// =============================================================================
// Value types
// =============================================================================

/// Flags controlling the image preprocessing pipeline.
///
/// The pipeline always runs in the order grayscale, contrast, sharpen;
/// each flag only decides whether its step runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingOptions {
    pub grayscale: bool,
    pub contrast: bool,
    pub sharpen: bool,
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            grayscale: true,
            contrast: true,
            sharpen: true,
        }
    }
}

impl PreprocessingOptions {
    /// All steps disabled.
    pub fn none() -> Self {
        Self {
            grayscale: false,
            contrast: false,
            sharpen: false,
        }
    }

    pub fn grayscale_only() -> Self {
        Self {
            grayscale: true,
            ..Self::none()
        }
    }
}

/// Text recognized from an image. Lives only for the duration of a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,
    /// Mean recognition confidence, 0-100.
    pub confidence: f32,
    pub language: OcrLanguage,
}

// =============================================================================
// Entities
// =============================================================================

/// Metadata for one uploaded file.
///
/// `storage_key` points at the blob holding the raw bytes. Records are never
/// updated; they are only created and deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Original file name as supplied by the uploader.
    pub name: String,
    pub storage_key: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Metadata for an upload that has not been persisted yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUpload {
    pub user_id: Uuid,
    pub name: String,
    pub storage_key: String,
    pub size_bytes: u64,
}

/// A short annotation attached to an upload. Append-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub file_id: Uuid,
    pub user_id: Uuid,
    pub user_email: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// An account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// An authenticated session: the explicit auth context handed to handlers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes_roundtrip_through_from_str() {
        for lang in OcrLanguage::ALL {
            assert_eq!(lang.code().parse::<OcrLanguage>().unwrap(), lang);
        }
    }

    #[test]
    fn test_language_rejects_unknown_code() {
        let err = "klingon".parse::<OcrLanguage>().unwrap_err();
        assert!(matches!(err, ScanshelfError::Validation(_)));
    }

    #[test]
    fn test_language_serde_uses_codes() {
        let json = serde_json::to_string(&OcrLanguage::ChineseSimplified).unwrap();
        assert_eq!(json, "\"chi_sim\"");
        let lang: OcrLanguage = serde_json::from_str("\"jpn\"").unwrap();
        assert_eq!(lang, OcrLanguage::Japanese);
    }

    #[test]
    fn test_language_default_is_english() {
        assert_eq!(OcrLanguage::default(), OcrLanguage::English);
        assert_eq!(OcrLanguage::English.display_name(), "English");
    }

    #[test]
    fn test_preprocessing_defaults_all_enabled() {
        let opts = PreprocessingOptions::default();
        assert!(opts.grayscale && opts.contrast && opts.sharpen);
    }

    #[test]
    fn test_preprocessing_partial_deserialize_keeps_defaults() {
        let opts: PreprocessingOptions = serde_json::from_str(r#"{"sharpen": false}"#).unwrap();
        assert!(opts.grayscale);
        assert!(opts.contrast);
        assert!(!opts.sharpen);
    }

    #[test]
    fn test_operation_kind_display() {
        assert_eq!(OperationKind::Extraction.to_string(), "extraction");
        assert_eq!(OperationKind::Upload.to_string(), "upload");
    }
}
