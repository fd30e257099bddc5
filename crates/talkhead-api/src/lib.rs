//! Axum HTTP API server.
//!
//! This crate provides:
//! - Avatar listing and preprocessing from uploaded videos
//! - MJPEG streaming and MP4 batch synthesis
//! - Health reporting with model readiness
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod upload;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
