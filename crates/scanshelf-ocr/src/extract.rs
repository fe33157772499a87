//! Extraction orchestrator: preprocess, recognize, clean.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{info, warn};

use scanshelf_core::error::{Result, ScanshelfError};
use scanshelf_core::progress::ProgressTracker;
use scanshelf_core::types::{ExtractionResult, OcrLanguage, PreprocessingOptions};

use crate::preprocess;
use crate::OcrEngine;

/// Message shown to users for any extraction failure.
pub const EXTRACTION_FAILED_MESSAGE: &str =
    "Failed to extract text. Please try a different image or adjust preprocessing settings.";

static LINE_BREAKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n]+").expect("Invalid line break regex"));
static INLINE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\r\n]+").expect("Invalid whitespace regex"));

/// Normalize recognized text.
///
/// Runs of `\r`/`\n` become a single `\n`, runs of any other whitespace
/// become a single space, and the result is trimmed.
pub fn clean_text(raw: &str) -> String {
    let text = LINE_BREAKS.replace_all(raw, "\n");
    let text = INLINE_WHITESPACE.replace_all(&text, " ");
    text.trim().to_string()
}

/// Whether a file with this MIME type can be sent through OCR.
pub fn is_extractable(content_type: &str) -> bool {
    content_type.trim().to_ascii_lowercase().starts_with("image/")
}

/// Drives one OCR engine over uploaded images.
#[derive(Clone)]
pub struct Extractor {
    engine: Arc<dyn OcrEngine>,
}

impl Extractor {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self { engine }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Preprocess `image`, recognize it in `language`, and return cleaned text.
    ///
    /// Recognition progress is published on `progress`, which is reset to 0
    /// when the call returns. Empty output fails with `NoTextExtracted`.
    pub async fn extract(
        &self,
        image: &[u8],
        language: OcrLanguage,
        options: PreprocessingOptions,
        progress: &ProgressTracker,
    ) -> Result<ExtractionResult> {
        progress.reset();
        let outcome = self.run(image, language, options, progress).await;
        progress.reset();

        match &outcome {
            Ok(result) => info!(
                engine = self.engine.name(),
                language = %language,
                text_len = result.text.len(),
                confidence = result.confidence,
                "Text extracted"
            ),
            Err(e) => warn!(engine = self.engine.name(), error = %e, "Text extraction failed"),
        }
        outcome
    }

    async fn run(
        &self,
        image: &[u8],
        language: OcrLanguage,
        options: PreprocessingOptions,
        progress: &ProgressTracker,
    ) -> Result<ExtractionResult> {
        let bytes = image.to_vec();
        let png = tokio::task::spawn_blocking(move || {
            preprocess::preprocess_to_png(&bytes, &options)
        })
        .await
        .map_err(|e| ScanshelfError::Decode(format!("Preprocessing task panicked: {}", e)))??;

        let recognition = self.engine.recognize(&png, language, progress).await?;

        let text = clean_text(&recognition.text);
        if text.is_empty() {
            return Err(ScanshelfError::NoTextExtracted);
        }

        Ok(ExtractionResult {
            text,
            confidence: recognition.confidence,
            language,
        })
    }
}
