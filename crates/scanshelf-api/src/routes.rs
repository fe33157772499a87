//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression,
//! authentication, rate limiting and all endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use scanshelf_core::config::ScanshelfConfig;
use scanshelf_core::error::ScanshelfError;

use crate::handlers;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;

/// Body limit for JSON routes (credentials, comments, export text).
const JSON_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Create the axum Router with all routes and middleware.
///
/// # Arguments
/// * `state` - The shared application state.
///
/// # Returns
/// A fully configured axum Router ready to serve requests.
pub fn create_router(state: AppState) -> Router {
    // CORS: allow localhost origins on the configured port and port+1 (dev server).
    let port = state.config.general.port;
    let dev_port = port.saturating_add(1);
    let origins: Vec<HeaderValue> = [port, dev_port]
        .iter()
        .flat_map(|p| {
            [
                format!("http://127.0.0.1:{}", p),
                format!("http://localhost:{}", p),
            ]
        })
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    // Routes that do NOT require authentication.
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/signup", post(handlers::sign_up))
        .route("/auth/signin", post(handlers::sign_in));

    let limiter = RateLimiter::new(state.config.api.rate_limit_per_sec);

    // Rate-limited protected routes.
    let rate_limited_routes = Router::new()
        .route("/auth/signout", post(handlers::sign_out))
        .route("/auth/user", get(handlers::current_user))
        .route("/languages", get(handlers::languages))
        .route(
            "/files",
            get(handlers::list_files)
                .post(handlers::upload_file)
                .layer(DefaultBodyLimit::disable()), // capped by upload.max_file_bytes
        )
        .route(
            "/files/{id}",
            get(handlers::get_file).delete(handlers::delete_file),
        )
        .route("/files/{id}/download", get(handlers::download_file))
        .route(
            "/files/{id}/comments",
            get(handlers::list_comments).post(handlers::add_comment),
        )
        .route(
            "/extract",
            post(handlers::extract).layer(DefaultBodyLimit::disable()),
        )
        .route("/export", post(handlers::export))
        .route("/progress", get(handlers::progress))
        .layer(axum::middleware::from_fn(
            crate::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::Extension(limiter));

    // SSE streams exempt from rate limiting.
    let stream_routes = Router::new()
        .route("/files/{id}/comments/stream", get(handlers::comment_stream))
        .route("/events", get(handlers::event_stream));

    // Combine all protected routes behind auth.
    let protected_routes =
        rate_limited_routes
            .merge(stream_routes)
            .route_layer(axum::middleware::from_fn_with_state(
                state.clone(),
                crate::auth::require_auth,
            ));

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured address.
///
/// Binds to 127.0.0.1 (localhost only) on the port from config.
pub async fn start_server(config: &ScanshelfConfig, state: AppState) -> Result<(), ScanshelfError> {
    let addr = format!("127.0.0.1:{}", config.general.port);

    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ScanshelfError::Api(format!("Failed to bind: {}", e)))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| ScanshelfError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
