//! Health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use talkhead_models::AvatarId;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub engine: String,
    pub models_ready: bool,
    pub loaded_avatars: Vec<AvatarId>,
}

/// Health check endpoint (liveness probe).
///
/// Always answers 200; `status` is "degraded" while the models are not ready.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let models_ready = state.models_ready().await;

    Json(HealthResponse {
        status: if models_ready { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        engine: state.service.engine_name().to_string(),
        models_ready,
        loaded_avatars: state.service.loaded_avatars().await,
    })
}
