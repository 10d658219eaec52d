use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::FileInfo;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Turn a caller-supplied path, optionally a `file://` URI, into a
/// filesystem path.
pub fn resolve_local_path(raw: &str) -> Result<PathBuf, ConfigError> {
    let trimmed = raw.trim();
    let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    if path.is_empty() {
        return Err(ConfigError::EmptyPath);
    }
    Ok(PathBuf::from(path))
}

/// MIME type guessed from a file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// Metadata for a local file. Missing files are reported with
/// `exists: false` rather than an error.
pub async fn file_info(raw: &str) -> Result<FileInfo, ConfigError> {
    let path = resolve_local_path(raw)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (exists, size) = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => (true, meta.len()),
        _ => (false, 0),
    };

    Ok(FileInfo {
        exists,
        size,
        name,
        extension,
        mime_type: mime_for_path(&path).to_string(),
    })
}
