//! Model client error types.

use thiserror::Error;

/// Result type for model calls.
pub type MlResult<T> = Result<T, MlClientError>;

/// Errors raised by an inference engine or the sidecar client.
#[derive(Debug, Error)]
pub enum MlClientError {
    #[error("Model service unavailable: {0}")]
    Unavailable(String),

    #[error("Model service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("Invalid model input: {0}")]
    InvalidInput(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Media error: {0}")]
    Media(#[from] talkhead_media::MediaError),
}

impl MlClientError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the failure concerns the caller's input rather than the
    /// service.
    pub fn is_input_error(&self) -> bool {
        match self {
            Self::InvalidInput(_) => true,
            Self::Status { status, .. } => (400..500).contains(status),
            _ => false,
        }
    }
}
