use thiserror::Error;

/// Top-level error type for Scanshelf.
///
/// Every crate in the workspace reports failures through this enum so the
/// `?` operator works across crate boundaries. The API layer maps variants to
/// HTTP status codes and fixed user-facing messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScanshelfError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("File too large: {size} bytes exceeds {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Image decode error: {0}")]
    Decode(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Extraction produced no text")]
    NoTextExtracted,

    #[error("Export error: {0}")]
    Export(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Partial delete of {key}: blob removed but metadata remains ({reason})")]
    PartialDelete { key: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation already running: {0}")]
    AlreadyRunning(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for ScanshelfError {
    fn from(err: toml::de::Error) -> Self {
        ScanshelfError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ScanshelfError {
    fn from(err: toml::ser::Error) -> Self {
        ScanshelfError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ScanshelfError {
    fn from(err: serde_json::Error) -> Self {
        ScanshelfError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Scanshelf operations.
pub type Result<T> = std::result::Result<T, ScanshelfError>;
