//! Scanshelf OCR crate - preprocessing, OCR engines, extraction and export.
//!
//! Provides the [`OcrEngine`] trait for text recognition, a
//! [`MockOcrEngine`] for tests, a [`TesseractCliEngine`] that drives the
//! `tesseract` binary, the [`Extractor`] orchestrator and text export.

pub mod export;
pub mod extract;
pub mod preprocess;
pub mod tesseract;

use std::sync::Mutex;

use async_trait::async_trait;

use scanshelf_core::error::ScanshelfError;
use scanshelf_core::progress::ProgressTracker;
use scanshelf_core::types::OcrLanguage;

pub use export::{render_pdf, wrap_lines, ExportFormat, ExportOptions, RenderedExport};
pub use extract::{clean_text, is_extractable, Extractor, EXTRACTION_FAILED_MESSAGE};
pub use tesseract::TesseractCliEngine;

/// Raw engine output before cleaning.
#[derive(Clone, Debug, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean confidence, 0-100.
    pub confidence: f32,
}

/// A text recognition engine.
///
/// Implementations report recognition-phase progress through `progress` as
/// fractions in `[0.0, 1.0]`.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in a PNG-encoded image.
    async fn recognize(
        &self,
        png: &[u8],
        language: OcrLanguage,
        progress: &ProgressTracker,
    ) -> Result<Recognition, ScanshelfError>;

    /// Engine name for logging.
    fn name(&self) -> &str;
}

/// Mock OCR engine for testing.
///
/// Returns canned text without looking at the image, walking progress
/// through a few steps so progress plumbing can be observed.
#[derive(Debug)]
pub struct MockOcrEngine {
    response_text: String,
    confidence: f32,
    fail_with: Option<String>,
    calls: Mutex<Vec<OcrLanguage>>,
}

impl MockOcrEngine {
    /// Create a mock engine with default response text.
    pub fn new() -> Self {
        Self::with_text("Mock OCR extracted text: Lorem ipsum dolor sit amet")
    }

    /// Create a mock engine that returns the specified text.
    pub fn with_text(text: &str) -> Self {
        Self {
            response_text: text.to_string(),
            confidence: 87.5,
            fail_with: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock engine that finds no text.
    pub fn empty() -> Self {
        Self::with_text("")
    }

    /// Create a mock engine whose every call fails.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new()
        }
    }

    /// Languages requested so far, in call order.
    pub fn calls(&self) -> Vec<OcrLanguage> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl Default for MockOcrEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for MockOcrEngine {
    async fn recognize(
        &self,
        png: &[u8],
        language: OcrLanguage,
        progress: &ProgressTracker,
    ) -> Result<Recognition, ScanshelfError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(language);
        }
        if png.is_empty() {
            return Err(ScanshelfError::Ocr("Empty image data".to_string()));
        }
        if let Some(message) = &self.fail_with {
            return Err(ScanshelfError::Ocr(message.clone()));
        }
        for step in [0.0, 0.25, 0.5, 0.75, 1.0] {
            progress.report_fraction(step);
        }
        Ok(Recognition {
            text: self.response_text.clone(),
            confidence: self.confidence,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
