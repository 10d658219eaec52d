use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::AppState;
use crate::storage::is_safe_name;

/// Name used by `/upload` and `/download` without a path segment.
pub const DEFAULT_STREAM_NAME: &str = "stream.bin";

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Most a rejected request body is read before the connection is dropped.
const MAX_DRAIN_SIZE: u64 = 64 * 1024 * 1024;

// ── Response types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub name: String,
    pub bytes: u64,
    pub sha256: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Read and discard a request body we are about to reject, so the client
/// finishes sending and can read the answer instead of hitting a reset.
async fn drain(body: Body) {
    let mut stream = http_body_util::BodyStream::new(body);
    let mut discarded: u64 = 0;
    while let Some(Ok(frame)) = stream.next().await {
        if let Ok(data) = frame.into_data() {
            discarded += data.len() as u64;
            if discarded > MAX_DRAIN_SIZE {
                warn!("Rejected body exceeds {} bytes, not draining", MAX_DRAIN_SIZE);
                return;
            }
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────────

/// POST|PUT /upload: store the raw request body as `stream.bin`.
pub async fn upload_default(state: State<AppState>, body: Body) -> Response {
    store(state, DEFAULT_STREAM_NAME.to_string(), body).await
}

/// POST|PUT /upload/{name}: store the raw request body under `name`.
pub async fn upload_named(
    state: State<AppState>,
    Path(name): Path<String>,
    body: Body,
) -> Response {
    store(state, name, body).await
}

async fn store(State(state): State<AppState>, name: String, body: Body) -> Response {
    if !is_safe_name(&name) {
        drain(body).await;
        return error_response(StatusCode::BAD_REQUEST, "Invalid stream name");
    }

    let mut file = match state.storage.create(&name).await {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to create {}: {}", name, e);
            drain(body).await;
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Storage unavailable");
        }
    };

    let mut stream = http_body_util::BodyStream::new(body);
    let mut hasher = Sha256::new();
    let mut received: u64 = 0;

    let outcome: anyhow::Result<()> = async {
        while let Some(frame) = stream.next().await {
            let frame = frame.map_err(|e| anyhow::anyhow!("body error: {}", e))?;
            let Ok(data) = frame.into_data() else {
                continue;
            };
            hasher.update(&data);
            file.write_all(&data).await?;
            received += data.len() as u64;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        warn!("Upload of {} aborted after {} bytes: {}", name, received, e);
        drop(file);
        if let Err(e) = state.storage.delete_file(&name).await {
            warn!("Failed to remove partial {}: {}", name, e);
        }
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Upload failed");
    }

    let sha256 = hex::encode(hasher.finalize());
    info!("Stored {} ({} bytes, sha256 {})", name, received, sha256);

    Json(UploadResponse {
        success: true,
        name,
        bytes: received,
        sha256,
    })
    .into_response()
}

/// GET /download: stream `stream.bin` back.
pub async fn download_default(state: State<AppState>) -> Response {
    serve(state, DEFAULT_STREAM_NAME.to_string()).await
}

/// GET /download/{name}: stream a stored file back.
pub async fn download_named(state: State<AppState>, Path(name): Path<String>) -> Response {
    serve(state, name).await
}

async fn serve(State(state): State<AppState>, name: String) -> Response {
    if !is_safe_name(&name) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid stream name");
    }

    let (mut file, content_length) = match state.storage.open(&name).await {
        Ok(Some(found)) => found,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "File not found"),
        Err(e) => {
            warn!("Failed to open {}: {}", name, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Storage unavailable");
        }
    };

    let stream = async_stream::stream! {
        let mut remaining = content_length;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        while remaining > 0 {
            let to_read = (remaining as usize).min(buf.len());
            match file.read(&mut buf[..to_read]).await {
                Ok(0) => break,
                Ok(n) => {
                    remaining -= n as u64;
                    yield Ok::<_, std::io::Error>(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));

    info!("Serving {} ({} bytes)", name, content_length);
    (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
}

pub async fn health() -> &'static str {
    "ok"
}

/// Fallback for unknown routes.
pub async fn not_found(body: Body) -> Response {
    drain(body).await;
    error_response(StatusCode::NOT_FOUND, "Not found")
}
