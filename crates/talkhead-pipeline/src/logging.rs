//! Structured request logging.
//!
//! Gives every preprocessing, streaming and assembly call a request id
//! and operation name that follow it through its log lines and into the
//! blocking stage threads.

use tracing::{error, info, warn, Span};
use uuid::Uuid;

use talkhead_models::AvatarId;

/// Request-scoped logger.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    request_id: String,
    operation: &'static str,
    avatar_id: String,
}

impl RequestLogger {
    /// Create a logger with a fresh request id.
    pub fn new(operation: &'static str, avatar_id: &AvatarId) -> Self {
        Self::with_request_id(Uuid::new_v4().to_string(), operation, avatar_id)
    }

    /// Create a logger reusing an upstream request id (e.g. `x-request-id`).
    pub fn with_request_id(request_id: impl Into<String>, operation: &'static str, avatar_id: &AvatarId) -> Self {
        Self {
            request_id: request_id.into(),
            operation,
            avatar_id: avatar_id.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            request_id = %self.request_id,
            operation = self.operation,
            avatar_id = %self.avatar_id,
            "Started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            request_id = %self.request_id,
            operation = self.operation,
            avatar_id = %self.avatar_id,
            "Progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            request_id = %self.request_id,
            operation = self.operation,
            avatar_id = %self.avatar_id,
            "Warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            request_id = %self.request_id,
            operation = self.operation,
            avatar_id = %self.avatar_id,
            "Failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            request_id = %self.request_id,
            operation = self.operation,
            avatar_id = %self.avatar_id,
            "Completed: {}", message
        );
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Span carrying the request context, entered by stage threads.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "request",
            request_id = %self.request_id,
            operation = self.operation,
            avatar_id = %self.avatar_id
        )
    }
}
