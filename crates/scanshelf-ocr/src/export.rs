//! Export of extracted text as a plain text file or a paginated PDF.

use std::fmt;
use std::str::FromStr;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, StringFormat, Stream};
use serde::{Deserialize, Serialize};

use scanshelf_core::config::ExportConfig;
use scanshelf_core::error::{Result, ScanshelfError};

/// A4 in PDF points.
const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
/// 15 mm.
const MARGIN: f32 = 42.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Txt,
    Pdf,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Txt => "text/plain; charset=utf-8",
            ExportFormat::Pdf => "application/pdf",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ExportFormat::Txt => "extracted-text.txt",
            ExportFormat::Pdf => "extracted-text.pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Txt => write!(f, "txt"),
            ExportFormat::Pdf => write!(f, "pdf"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ScanshelfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "txt" => Ok(ExportFormat::Txt),
            "pdf" => Ok(ExportFormat::Pdf),
            other => Err(ScanshelfError::Validation(format!(
                "Unsupported export format '{}'. Must be one of: txt, pdf",
                other
            ))),
        }
    }
}

/// Layout parameters for PDF export.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExportOptions {
    pub columns: usize,
    pub lines_per_page: usize,
    pub font_size: f32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for ExportOptions {
    fn from(config: &ExportConfig) -> Self {
        Self {
            columns: config.columns,
            lines_per_page: config.lines_per_page,
            font_size: config.font_size,
        }
    }
}

/// An export ready to hand to the client.
#[derive(Clone, Debug)]
pub struct RenderedExport {
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

/// Render `text` in the requested format.
pub fn render(text: &str, format: ExportFormat, options: &ExportOptions) -> Result<RenderedExport> {
    if text.trim().is_empty() {
        return Err(ScanshelfError::Validation(
            "No text available to download".into(),
        ));
    }
    let bytes = match format {
        ExportFormat::Txt => text.as_bytes().to_vec(),
        ExportFormat::Pdf => render_pdf(text, options)?,
    };
    Ok(RenderedExport { format, bytes })
}

/// Greedy word wrap at `columns` characters.
///
/// Explicit line breaks are kept; words longer than a line are split.
pub fn wrap_lines(text: &str, columns: usize) -> Vec<String> {
    let columns = columns.max(1);
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_len = 0usize;

        for word in paragraph.split_whitespace() {
            let mut chars: Vec<char> = word.chars().collect();

            while chars.len() > columns {
                if current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                let rest = chars.split_off(columns);
                lines.push(chars.into_iter().collect());
                chars = rest;
            }

            let word_len = chars.len();
            if word_len == 0 {
                continue;
            }
            let needed = if current_len == 0 {
                word_len
            } else {
                current_len + 1 + word_len
            };
            if needed > columns {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.extend(chars);
            current_len += word_len;
        }

        lines.push(current);
    }

    lines
}

/// Render `text` as a Helvetica PDF, wrapped and split into pages.
pub fn render_pdf(text: &str, options: &ExportOptions) -> Result<Vec<u8>> {
    let lines = wrap_lines(text, options.columns);
    let leading = options.font_size * 1.15;
    let lines_per_page = options.lines_per_page.max(1);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for page_lines in lines.chunks(lines_per_page) {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), options.font_size.into()]),
            Operation::new("TL", vec![leading.into()]),
            Operation::new(
                "Td",
                vec![MARGIN.into(), (PAGE_HEIGHT - MARGIN - options.font_size).into()],
            ),
        ];
        for line in page_lines {
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(latin1_bytes(line), StringFormat::Literal)],
            ));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let encoded = content
            .encode()
            .map_err(|e| ScanshelfError::Export(format!("Failed to encode page: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_count,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| ScanshelfError::Export(format!("Failed to write PDF: {}", e)))?;
    Ok(buf)
}

/// WinAnsi is close enough to Latin-1 for the standard fonts; anything
/// outside it is replaced with `?`.
fn latin1_bytes(line: &str) -> Vec<u8> {
    line.chars()
        .map(|c| if (c as u32) < 256 { c as u32 as u8 } else { b'?' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!("txt".parse::<ExportFormat>().unwrap(), ExportFormat::Txt);
        assert_eq!("PDF".parse::<ExportFormat>().unwrap(), ExportFormat::Pdf);
        assert!("docx".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Pdf.file_name(), "extracted-text.pdf");
    }

    #[test]
    fn test_wrap_short_text_unchanged() {
        assert_eq!(wrap_lines("hello world", 20), vec!["hello world"]);
    }

    #[test]
    fn test_wrap_breaks_on_word_boundaries() {
        let lines = wrap_lines("the quick brown fox jumps", 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps"]);
        assert!(lines.iter().all(|l| l.chars().count() <= 10));
    }

    #[test]
    fn test_wrap_keeps_explicit_breaks() {
        assert_eq!(wrap_lines("a\n\nb", 10), vec!["a", "", "b"]);
    }

    #[test]
    fn test_wrap_splits_long_words() {
        let lines = wrap_lines("ab abcdefghij", 4);
        assert_eq!(lines, vec!["ab", "abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_wrap_counts_chars_not_bytes() {
        let lines = wrap_lines("日本語 テキスト", 4);
        assert_eq!(lines, vec!["日本語", "テキスト"]);
    }

    #[test]
    fn test_render_txt_is_verbatim() {
        let out = render("line one\nline two", ExportFormat::Txt, &ExportOptions::default()).unwrap();
        assert_eq!(out.bytes, b"line one\nline two");
    }

    #[test]
    fn test_render_rejects_empty_text() {
        let err = render("  \n", ExportFormat::Pdf, &ExportOptions::default()).unwrap_err();
        assert!(err.to_string().contains("No text available to download"));
    }

    #[test]
    fn test_render_pdf_paginates() {
        let options = ExportOptions {
            columns: 20,
            lines_per_page: 5,
            font_size: 12.0,
        };
        let text = (0..12)
            .map(|i| format!("line number {}", i))
            .collect::<Vec<_>>()
            .join("\n");

        let bytes = render_pdf(&text, &options).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn test_latin1_replacement() {
        assert_eq!(latin1_bytes("café ☃"), vec![b'c', b'a', b'f', 0xE9, b' ', b'?']);
    }
}
