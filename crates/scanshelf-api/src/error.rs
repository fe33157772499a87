//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints. Internal failures are logged with full detail and answered
//! with a short fixed message; nothing internal reaches the client.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use scanshelf_core::error::ScanshelfError;
use scanshelf_ocr::EXTRACTION_FAILED_MESSAGE;
use scanshelf_storage::size_limit_message;

/// Generic message for unexpected failures.
pub const INTERNAL_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 401 Unauthorized - missing, invalid or expired session.
    Unauthorized(String),
    /// 404 Not Found - resource does not exist or is not visible to the caller.
    NotFound(String),
    /// 409 Conflict - duplicate account or operation already running.
    Conflict(String),
    /// 413 Payload Too Large - upload over the size cap.
    PayloadTooLarge(String),
    /// 415 Unsupported Media Type - non-image sent for extraction.
    UnsupportedMediaType(String),
    /// 422 Unprocessable Entity - input understood but nothing usable in it.
    UnprocessableEntity(String),
    /// 429 Too Many Requests - rate limit hit.
    TooManyRequests(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
}

impl ApiError {
    /// Map `err`, replacing the generic internal message with `message`.
    ///
    /// Validation and lookup failures keep their own messages.
    pub fn with_message(err: ScanshelfError, message: &str) -> Self {
        match ApiError::from(err) {
            ApiError::Internal(_) => ApiError::Internal(message.to_string()),
            other => other,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg)
            }
            ApiError::UnsupportedMediaType(msg) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_media_type",
                msg,
            ),
            ApiError::UnprocessableEntity(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable_entity", msg)
            }
            ApiError::TooManyRequests(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, "too_many_requests", msg)
            }
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ScanshelfError> for ApiError {
    fn from(err: ScanshelfError) -> Self {
        match err {
            ScanshelfError::Validation(msg) => ApiError::BadRequest(msg),
            ScanshelfError::FileTooLarge { limit, .. } => {
                ApiError::PayloadTooLarge(size_limit_message(limit))
            }
            ScanshelfError::Decode(msg) => {
                error!(error = %msg, "Image could not be decoded");
                ApiError::UnprocessableEntity(EXTRACTION_FAILED_MESSAGE.to_string())
            }
            ScanshelfError::NoTextExtracted => {
                ApiError::UnprocessableEntity(EXTRACTION_FAILED_MESSAGE.to_string())
            }
            ScanshelfError::Ocr(msg) => {
                error!(error = %msg, "OCR engine failed");
                ApiError::Internal(EXTRACTION_FAILED_MESSAGE.to_string())
            }
            ScanshelfError::NotFound(msg) => ApiError::NotFound(format!("{} not found", msg)),
            ScanshelfError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            ScanshelfError::Conflict(msg) => ApiError::Conflict(msg),
            ScanshelfError::AlreadyRunning(_) => {
                ApiError::Conflict("This operation is already in progress".to_string())
            }
            other => {
                error!(error = %other, "Request failed");
                ApiError::Internal(INTERNAL_ERROR_MESSAGE.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = rejection.body_text();
        match rejection.status() {
            StatusCode::UNSUPPORTED_MEDIA_TYPE => ApiError::UnsupportedMediaType(message),
            StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge(message),
            _ => ApiError::BadRequest(message),
        }
    }
}

/// `Json` extractor whose rejections answer with an [`ErrorBody`].
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}
