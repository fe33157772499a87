//! Scanshelf API crate - axum HTTP server, route handlers, SSE streaming.
//!
//! Provides the REST API for Scanshelf: sign-up and sessions, file upload,
//! listing, download and deletion, OCR extraction and text export, and
//! comments with a live SSE stream per file.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::{AppState, SlotRegistry};
