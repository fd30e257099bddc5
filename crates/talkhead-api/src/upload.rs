//! Multipart upload handling.

use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, Multipart};
use scopeguard::ScopeGuard;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// Uploaded file on disk, removed when dropped unless kept.
pub type UploadGuard = ScopeGuard<PathBuf, fn(PathBuf)>;

/// Guard that deletes `path` when it goes out of scope.
pub fn remove_on_drop(path: PathBuf) -> UploadGuard {
    scopeguard::guard(path, remove_upload as fn(PathBuf))
}

fn remove_upload(path: PathBuf) {
    match std::fs::remove_file(&path) {
        Ok(()) => debug!(path = %path.display(), "Removed upload"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove upload"),
    }
}

/// Reduce a client supplied file name to a safe single path component.
pub fn sanitize_file_name(name: Option<&str>) -> String {
    let base = name
        .and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Stream a file field into `dir` under a unique name.
pub async fn save_field(mut field: Field<'_>, dir: &Path, kind: &str) -> ApiResult<UploadGuard> {
    let field_name = field.name().unwrap_or_default().to_string();
    let file_name = format!("{}_{}", Uuid::new_v4(), sanitize_file_name(field.file_name()));

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    let guard = remove_on_drop(path.clone());

    let mut file = tokio::fs::File::create(&path).await?;
    let mut size: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed reading multipart '{}' field: {}", field_name, e)))?
    {
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if size == 0 {
        return Err(ApiError::validation(format!("'{}' is empty", field_name)));
    }

    metrics::record_upload(kind, size);
    debug!(path = %path.display(), bytes = size, "Saved upload");
    Ok(guard)
}

/// Read a text field.
pub async fn text_field(field: Field<'_>) -> ApiResult<String> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map(|t| t.trim().to_string())
        .map_err(|e| ApiError::bad_request(format!("Failed reading multipart '{}' field: {}", name, e)))
}

/// Save the single `audio_file` field of an inference request.
pub async fn audio_upload(mut multipart: Multipart, dir: &Path) -> ApiResult<UploadGuard> {
    let mut audio = None;
    while let Some(field) = next_field(&mut multipart).await? {
        if field.name() == Some("audio_file") {
            audio = Some(save_field(field, dir, "audio").await?);
        }
    }
    audio.ok_or_else(|| ApiError::validation("missing 'audio_file' field"))
}

pub async fn next_field(multipart: &mut Multipart) -> ApiResult<Option<Field<'_>>> {
    multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {}", e)))
}

/// Parse a form boolean ("true"/"false"/"1"/"0"/"yes"/"no").
pub fn parse_bool(name: &str, value: &str) -> ApiResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ApiError::validation(format!("'{}' must be a boolean, got '{}'", name, value))),
    }
}
