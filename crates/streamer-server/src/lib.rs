/// Streamer reference server: a plain byte-stream endpoint for uploads and
/// downloads.
///
/// - `POST|PUT /upload[/{name}]` stores the raw request body and answers with
///   its size and SHA-256
/// - `GET /download[/{name}]` streams a stored file with `Content-Length`
/// - `GET /health`
///
/// Bodies are never inspected, so encrypted streams round-trip untouched.

pub mod routes;
pub mod storage;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::storage::Storage;

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
}

/// Largest accepted upload body.
pub const MAX_BODY_SIZE: usize = 4 * 1024 * 1024 * 1024; // 4 GB

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/upload",
            post(routes::upload_default).put(routes::upload_default),
        )
        .route(
            "/upload/{name}",
            post(routes::upload_named).put(routes::upload_named),
        )
        .route("/download", get(routes::download_default))
        .route("/download/{name}", get(routes::download_named))
        .route("/health", get(routes::health))
        .fallback(routes::not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
