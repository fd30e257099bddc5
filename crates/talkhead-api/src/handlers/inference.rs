//! Synthesis handlers.

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::Response;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{future, StreamExt};
use tracing::warn;

use talkhead_models::AvatarId;

use crate::error::{ApiError, ApiResult};
use crate::handlers::avatars::request_logger;
use crate::metrics;
use crate::middleware::RequestId;
use crate::state::AppState;
use crate::upload::{audio_upload, UploadGuard};

/// Content type of the frame stream.
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap one JPEG as a part of the `frame` multipart stream.
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    const HEAD: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let mut part = BytesMut::with_capacity(HEAD.len() + jpeg.len() + 2);
    part.put_slice(HEAD);
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

fn parse_avatar_id(raw: String) -> ApiResult<AvatarId> {
    AvatarId::parse(raw).map_err(|e| ApiError::validation(e.to_string()))
}

/// Resources held for the lifetime of a streamed response.
struct StreamCleanup {
    _audio: UploadGuard,
}

impl Drop for StreamCleanup {
    fn drop(&mut self) {
        metrics::stream_closed();
    }
}

/// Stream synthesized frames as MJPEG.
///
/// A frame failure ends the stream early; the status line has already been
/// sent by then.
pub async fn stream_inference(
    State(state): State<AppState>,
    Path(avatar_id): Path<String>,
    request_id: Option<axum::Extension<RequestId>>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let avatar_id = parse_avatar_id(avatar_id)?;
    state.service.avatar_for(&avatar_id, None).await?;

    let audio = audio_upload(multipart, &state.service.config().uploads_dir()).await?;
    let logger = request_logger(request_id, "stream", &avatar_id);
    let frames = state.service.stream(&avatar_id, &audio, &logger).await?;

    metrics::stream_opened();
    let cleanup = StreamCleanup { _audio: audio };
    let body = frames.scan(cleanup, move |_, item| {
        let part = match item {
            Ok(jpeg) => Some(Ok::<_, std::convert::Infallible>(mjpeg_part(&jpeg))),
            Err(e) => {
                warn!(avatar_id = %avatar_id, error = %e, "Frame stream ended early");
                None
            }
        };
        future::ready(part)
    });

    Response::builder()
        .header(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

/// Synthesize a complete MP4 and return it.
pub async fn batch_inference(
    State(state): State<AppState>,
    Path(avatar_id): Path<String>,
    request_id: Option<axum::Extension<RequestId>>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let avatar_id = parse_avatar_id(avatar_id)?;
    state.service.avatar_for(&avatar_id, None).await?;

    let audio = audio_upload(multipart, &state.service.config().uploads_dir()).await?;
    let logger = request_logger(request_id, "batch", &avatar_id);
    let output = state.service.assemble(&avatar_id, &audio, None, &logger).await?;
    drop(audio);

    let video = tokio::fs::read(&output).await?;
    let file_name = output
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output.mp4")
        .to_string();

    Response::builder()
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name))
        .body(Body::from(video))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mjpeg_part_framing() {
        let part = mjpeg_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.ends_with(&[0xFF, 0xD9, b'\r', b'\n']));
        assert_eq!(part.len(), 37 + 4 + 2);
    }

    #[test]
    fn test_invalid_avatar_id_is_validation_error() {
        let err = parse_avatar_id("../etc".to_string()).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
