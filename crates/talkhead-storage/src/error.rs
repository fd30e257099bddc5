//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during avatar storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Avatar not found: {0}")]
    NotFound(String),

    #[error("Inconsistent avatar {avatar_id}: {reason}")]
    Inconsistent { avatar_id: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl StorageError {
    pub fn not_found(avatar_id: impl Into<String>) -> Self {
        Self::NotFound(avatar_id.into())
    }

    pub fn inconsistent(avatar_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Inconsistent {
            avatar_id: avatar_id.into(),
            reason: reason.into(),
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}
