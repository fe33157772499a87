//! OCR through the `tesseract` command-line binary.
//!
//! The preprocessed PNG is piped to `tesseract stdin stdout -l <lang> tsv`
//! and the TSV word table is folded back into lines and a mean confidence.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use scanshelf_core::error::ScanshelfError;
use scanshelf_core::progress::ProgressTracker;
use scanshelf_core::types::OcrLanguage;

use crate::{OcrEngine, Recognition};

/// TSV row level for individual words.
const WORD_LEVEL: &str = "5";

/// Tesseract-backed OCR engine.
#[derive(Debug, Clone)]
pub struct TesseractCliEngine {
    binary: String,
}

impl TesseractCliEngine {
    /// Create an engine that invokes `binary` (a name on `PATH` or a full path).
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for TesseractCliEngine {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl OcrEngine for TesseractCliEngine {
    async fn recognize(
        &self,
        png: &[u8],
        language: OcrLanguage,
        progress: &ProgressTracker,
    ) -> Result<Recognition, ScanshelfError> {
        if png.is_empty() {
            return Err(ScanshelfError::Ocr("Empty image data".into()));
        }
        progress.report_fraction(0.0);

        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", language.code(), "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ScanshelfError::Ocr(format!("Failed to start {}: {}", self.binary, e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ScanshelfError::Ocr("tesseract stdin unavailable".into()))?;
        let input = png.to_vec();
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ScanshelfError::Ocr(format!("tesseract did not finish: {}", e)))?;

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to write image to tesseract"),
            Err(e) => warn!(error = %e, "tesseract writer task panicked"),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanshelfError::Ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let recognition = parse_tsv(&tsv);
        progress.report_fraction(1.0);
        debug!(
            language = %language,
            text_len = recognition.text.len(),
            confidence = recognition.confidence,
            "tesseract recognition finished"
        );
        Ok(recognition)
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

/// Fold tesseract TSV output into text and mean word confidence.
///
/// Words on the same line are joined by spaces, lines by `\n`, and a blank
/// line separates paragraphs and blocks. Words with negative confidence are
/// ignored.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut text = String::new();
    let mut confidences: Vec<f32> = Vec::new();
    let mut current_line: Option<(&str, &str, &str, &str)> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != WORD_LEVEL {
            continue;
        }
        let word = cols[11].trim();
        let conf: f32 = match cols[10].trim().parse() {
            Ok(c) => c,
            Err(_) => continue,
        };
        if word.is_empty() || conf < 0.0 {
            continue;
        }

        // (page, block, paragraph, line)
        let line_key = (cols[1], cols[2], cols[3], cols[4]);
        match current_line {
            Some(prev) if prev == line_key => text.push(' '),
            Some(prev) if prev.0 == line_key.0 && prev.1 == line_key.1 && prev.2 == line_key.2 => {
                text.push('\n')
            }
            Some(_) => text.push_str("\n\n"),
            None => {}
        }
        current_line = Some(line_key);
        text.push_str(word);
        confidences.push(conf);
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };

    Recognition { text, confidence }
}
