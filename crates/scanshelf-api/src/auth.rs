//! API authentication via bearer session tokens.
//!
//! The middleware validates `Authorization: Bearer <token>` against the
//! session store and hands the resolved [`Session`] to handlers as a request
//! extension, so every handler receives its auth context explicitly.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use scanshelf_core::error::ScanshelfError;
use scanshelf_core::types::Session;

use crate::error::ApiError;
use crate::state::AppState;

/// Pull the bearer token out of the `Authorization` header.
fn bearer_token(req: &Request) -> Result<&str, ApiError> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;
    let value = value.to_str().map_err(|_| {
        ApiError::Unauthorized("Invalid Authorization header encoding".to_string())
    })?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Invalid bearer token".to_string()))
}

/// Middleware that resolves the bearer token into a [`Session`].
///
/// Returns 401 if the header is missing or the session does not exist.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let session: Session = match bearer_token(&req) {
        Ok(token) => match state.auth.current_user(token) {
            Ok(session) => session,
            Err(ScanshelfError::Unauthorized(reason)) => {
                debug!(reason = %reason, "Rejected bearer token");
                return ApiError::Unauthorized("Invalid bearer token".to_string()).into_response();
            }
            Err(e) => return ApiError::from(e).into_response(),
        },
        Err(e) => return e.into_response(),
    };

    req.extensions_mut().insert(session);
    next.run(req).await
}
