//! Avatar management handlers.

use axum::extract::{Multipart, State};
use axum::Json;
use scopeguard::ScopeGuard;
use serde::Serialize;

use talkhead_models::{AvatarId, AvatarInfo};
use talkhead_pipeline::{BuildRequest, RequestLogger};

use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestId;
use crate::state::AppState;
use crate::upload::{next_field, parse_bool, save_field, text_field, UploadGuard};

/// Response for a completed preprocessing request.
#[derive(Serialize)]
pub struct PreprocessResponse {
    pub message: String,
    pub avatar_id: AvatarId,
    pub info: AvatarInfo,
}

/// List avatars available on disk.
pub async fn list_avatars(State(state): State<AppState>) -> ApiResult<Json<Vec<AvatarId>>> {
    Ok(Json(state.service.list_avatars().await?))
}

#[derive(Default)]
struct PreprocessForm {
    avatar_id: Option<String>,
    video: Option<UploadGuard>,
    bbox_shift: i32,
    force_recreation: bool,
}

async fn read_form(mut multipart: Multipart, state: &AppState) -> ApiResult<PreprocessForm> {
    let uploads = state.service.config().uploads_dir();
    let mut form = PreprocessForm::default();

    while let Some(field) = next_field(&mut multipart).await? {
        match field.name().unwrap_or_default() {
            "avatar_id" => form.avatar_id = Some(text_field(field).await?),
            "video_file" => form.video = Some(save_field(field, &uploads, "video").await?),
            "bbox_shift" => {
                let value = text_field(field).await?;
                if !value.is_empty() {
                    form.bbox_shift = value
                        .parse()
                        .map_err(|_| ApiError::validation(format!("'bbox_shift' must be an integer, got '{}'", value)))?;
                }
            }
            "force_recreation" => form.force_recreation = parse_bool("force_recreation", &text_field(field).await?)?,
            _ => {}
        }
    }

    Ok(form)
}

/// Upload a video and build an avatar from it.
///
/// The upload is kept under `{results_dir}/uploads/` when it was used to
/// build the avatar and removed otherwise.
pub async fn preprocess_avatar(
    State(state): State<AppState>,
    request_id: Option<axum::Extension<RequestId>>,
    multipart: Multipart,
) -> ApiResult<Json<PreprocessResponse>> {
    let form = read_form(multipart, &state).await?;

    let raw_id = form
        .avatar_id
        .ok_or_else(|| ApiError::validation("missing 'avatar_id' field"))?;
    let avatar_id = AvatarId::parse(raw_id).map_err(|e| ApiError::validation(e.to_string()))?;
    let video = form
        .video
        .ok_or_else(|| ApiError::validation("missing 'video_file' field"))?;

    let logger = request_logger(request_id, "preprocess", &avatar_id);
    let request = BuildRequest {
        avatar_id: avatar_id.clone(),
        source: video.to_path_buf(),
        bbox_shift: form.bbox_shift,
        force_recreation: form.force_recreation,
    };

    let outcome = state.service.preprocess(request, &logger).await?;

    // A reused avatar keeps pointing at its original source
    let message = if outcome.rebuilt {
        ScopeGuard::into_inner(video);
        "Avatar processed successfully"
    } else {
        "Avatar already up to date"
    };

    Ok(Json(PreprocessResponse {
        message: message.to_string(),
        avatar_id,
        info: outcome.avatar.info.clone(),
    }))
}

pub(crate) fn request_logger(
    request_id: Option<axum::Extension<RequestId>>,
    operation: &'static str,
    avatar_id: &AvatarId,
) -> RequestLogger {
    match request_id {
        Some(axum::Extension(RequestId(id))) => RequestLogger::with_request_id(id, operation, avatar_id),
        None => RequestLogger::new(operation, avatar_id),
    }
}
