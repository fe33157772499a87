//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors,
//! interacts with AppState services, and returns JSON responses.
//! Authenticated handlers receive the caller's [`Session`] as an extension.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use scanshelf_core::events::DomainEvent;
use scanshelf_core::format::format_file_size;
use scanshelf_core::lifecycle::SlotSnapshot;
use scanshelf_core::types::{
    Comment, OcrLanguage, OperationKind, PreprocessingOptions, Session, UploadRecord, User,
};
use scanshelf_ocr::export::render;
use scanshelf_ocr::{is_extractable, ExportFormat};
use scanshelf_storage::{size_limit_message, COMMENT_FAILED_MESSAGE, UPLOAD_FAILED_MESSAGE};

use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewCommentRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtractParams {
    pub lang: Option<String>,
    pub grayscale: Option<bool>,
    pub contrast: Option<bool>,
    pub sharpen: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub text: String,
    #[serde(default)]
    pub format: ExportFormat,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub ocr_engine: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    #[serde(flatten)]
    pub record: UploadRecord,
    /// Human-readable size, e.g. "1.5 MB".
    pub size_display: String,
}

impl From<UploadRecord> for FileResponse {
    fn from(record: UploadRecord) -> Self {
        let size_display = format_file_size(record.size_bytes);
        Self {
            record,
            size_display,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilesResponse {
    pub files: Vec<FileResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentsResponse {
    pub comments: Vec<Comment>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractionResponse {
    pub text: String,
    pub confidence: f32,
    pub language: OcrLanguage,
    pub language_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LanguagesResponse {
    pub languages: Vec<LanguageInfo>,
    pub default: OcrLanguage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub extraction: SlotSnapshot,
    pub upload: SlotSnapshot,
}

// =============================================================================
// Helpers
// =============================================================================

/// Read a raw request body, rejecting it with the size message once it
/// exceeds `limit`. A declared `Content-Length` over the limit is rejected
/// before any of the body is read.
async fn read_limited_body(
    headers: &HeaderMap,
    body: Body,
    limit: u64,
) -> Result<Vec<u8>, ApiError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ApiError::PayloadTooLarge(size_limit_message(limit)));
    }

    let cap = usize::try_from(limit).unwrap_or(usize::MAX);
    match axum::body::to_bytes(body, cap).await {
        Ok(bytes) => Ok(bytes.to_vec()),
        Err(e) => {
            warn!(error = %e, "Request body rejected");
            Err(ApiError::PayloadTooLarge(size_limit_message(limit)))
        }
    }
}

/// Best-effort MIME type from a file name's extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// `attachment; filename="..."` with quotes and control characters removed.
fn attachment_header(name: &str) -> HeaderValue {
    let safe: String = name
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && *c != '"' && *c != '\\')
        .collect();
    let safe = if safe.trim().is_empty() { "download".to_string() } else { safe };
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", safe))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn file_response(content_type: &str, file_name: &str, bytes: Vec<u8>) -> Response {
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, attachment_header(file_name)),
        ],
        bytes,
    )
        .into_response()
}

// =============================================================================
// Public handlers
// =============================================================================

/// GET /health - liveness and version.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        ocr_engine: state.extractor.engine_name().to_string(),
    })
}

/// POST /auth/signup - create an account.
pub async fn sign_up(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Credentials>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.auth.sign_up(&body.email, &body.password)?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /auth/signin - exchange credentials for a bearer token.
pub async fn sign_in(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Credentials>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.auth.sign_in(&body.email, &body.password)?;
    Ok(Json(SessionResponse {
        token: session.token,
        user: session.user,
    }))
}

/// GET /languages - OCR languages offered for extraction.
pub async fn languages(State(state): State<AppState>) -> Json<LanguagesResponse> {
    Json(LanguagesResponse {
        languages: OcrLanguage::ALL
            .iter()
            .map(|lang| LanguageInfo {
                code: lang.code().to_string(),
                name: lang.display_name().to_string(),
            })
            .collect(),
        default: state.config.ocr.default_language,
    })
}

// =============================================================================
// Session handlers
// =============================================================================

/// POST /auth/signout - end the current session.
pub async fn sign_out(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<StatusCode, ApiError> {
    state.auth.sign_out(&session.token)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/user - the signed-in user.
pub async fn current_user(Extension(session): Extension<Session>) -> Json<User> {
    Json(session.user)
}

// =============================================================================
// File handlers
// =============================================================================

/// GET /files - the caller's uploads, newest first, optionally filtered by `q`.
pub async fn list_files(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(params): Query<ListFilesParams>,
) -> Result<Json<FilesResponse>, ApiError> {
    let records = state.uploads.list(session.user.id, params.q.as_deref())?;
    Ok(Json(FilesResponse {
        files: records.into_iter().map(FileResponse::from).collect(),
    }))
}

/// POST /files?name= - upload the raw request body as a new file.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<FileResponse>), ApiError> {
    let name = params
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Parameter 'name' is required".to_string()))?;

    let data = read_limited_body(&headers, body, state.uploads.max_file_bytes()).await?;

    let guard = state.slots.begin(session.user.id, OperationKind::Upload)?;
    let outcome = state
        .uploads
        .upload(session.user.id, &name, &data, guard.progress())
        .await;
    let record = guard
        .complete(outcome)
        .map_err(|e| ApiError::with_message(e, UPLOAD_FAILED_MESSAGE))?;

    Ok((StatusCode::CREATED, Json(FileResponse::from(record))))
}

/// GET /files/{id} - metadata for one of the caller's files.
pub async fn get_file(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> Result<Json<FileResponse>, ApiError> {
    let record = state.uploads.get(session.user.id, id)?;
    Ok(Json(FileResponse::from(record)))
}

/// GET /files/{id}/download - the stored bytes as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let (record, bytes) = state
        .uploads
        .download(session.user.id, id)
        .await
        .map_err(|e| ApiError::with_message(e, "Failed to download file"))?;
    Ok(file_response(content_type_for(&record.name), &record.name, bytes))
}

/// DELETE /files/{id} - remove the blob and its record.
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .uploads
        .delete(session.user.id, id)
        .await
        .map_err(|e| ApiError::with_message(e, "Failed to delete file"))?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Comment handlers
// =============================================================================

/// GET /files/{id}/comments - comments in creation order.
pub async fn list_comments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CommentsResponse>, ApiError> {
    let comments = state.comments.list(id)?;
    Ok(Json(CommentsResponse { comments }))
}

/// POST /files/{id}/comments - append a comment as the signed-in user.
pub async fn add_comment(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
    ApiJson(body): ApiJson<NewCommentRequest>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let comment = state
        .comments
        .add(&session.user, id, &body.content)
        .map_err(|e| ApiError::with_message(e, COMMENT_FAILED_MESSAGE))?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// GET /files/{id}/comments/stream - SSE stream of new comments on one file.
///
/// The subscription is released when the client disconnects.
pub async fn comment_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    let subscription = state.comments.subscribe(id)?;
    let stream = subscription.into_stream().map(|comment| {
        let data = serde_json::to_string(&comment).unwrap_or_default();
        Ok(Event::default()
            .event("comment")
            .id(comment.id.to_string())
            .data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE)))
}

/// GET /events - SSE stream of the caller's own domain events.
pub async fn event_stream(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send> {
    let user_id = session.user.id;
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.user_id() == user_id => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().event(event.event_type()).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
}

// =============================================================================
// Extraction and export handlers
// =============================================================================

/// POST /extract - run OCR on the raw image body.
pub async fn extract(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(params): Query<ExtractParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ExtractionResponse>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !is_extractable(content_type) {
        return Err(ApiError::UnsupportedMediaType(
            "Text extraction is only available for image files".to_string(),
        ));
    }

    let language = match params.lang.as_deref() {
        Some(code) => code.parse::<OcrLanguage>()?,
        None => state.config.ocr.default_language,
    };
    let defaults = state.config.ocr.preprocessing;
    let options = PreprocessingOptions {
        grayscale: params.grayscale.unwrap_or(defaults.grayscale),
        contrast: params.contrast.unwrap_or(defaults.contrast),
        sharpen: params.sharpen.unwrap_or(defaults.sharpen),
    };

    let image = read_limited_body(&headers, body, state.config.upload.max_file_bytes).await?;

    let guard = state.slots.begin(session.user.id, OperationKind::Extraction)?;
    let outcome = state
        .extractor
        .extract(&image, language, options, guard.progress())
        .await;
    let result = guard.complete(outcome)?;

    info!(user_id = %session.user.id, language = %language, "Extraction served");
    state.events.publish(DomainEvent::TextExtracted {
        user_id: session.user.id,
        language,
        text_length: result.text.chars().count(),
        confidence: result.confidence,
        timestamp: Utc::now(),
    });

    Ok(Json(ExtractionResponse {
        text: result.text,
        confidence: result.confidence,
        language: result.language,
        language_name: result.language.display_name().to_string(),
    }))
}

/// POST /export - render text as a TXT or PDF attachment.
pub async fn export(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ExportRequest>,
) -> Result<Response, ApiError> {
    let options = state.export_options();
    let format = body.format;
    let text = body.text;
    let rendered = tokio::task::spawn_blocking(move || render(&text, format, &options))
        .await
        .map_err(|e| ApiError::Internal(format!("Export task failed: {}", e)))??;

    Ok(file_response(
        rendered.format.content_type(),
        rendered.format.file_name(),
        rendered.bytes,
    ))
}

/// GET /progress - the caller's extraction and upload slot state.
pub async fn progress(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Json<ProgressResponse> {
    let user_id = session.user.id;
    Json(ProgressResponse {
        extraction: state
            .slots
            .slot(user_id, OperationKind::Extraction)
            .snapshot(),
        upload: state.slots.slot(user_id, OperationKind::Upload).snapshot(),
    })
}
