//! Pipeline error types.

use thiserror::Error;

use talkhead_media::MediaError;
use talkhead_ml_client::MlClientError;
use talkhead_storage::StorageError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("No valid face detections: {0}")]
    NoValidDetections(String),

    #[error("Inconsistent avatar: {0}")]
    InconsistentAvatar(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Pipeline aborted: {0}")]
    PipelineAborted(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Engine error: {0}")]
    Engine(#[from] MlClientError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_source(msg: impl Into<String>) -> Self {
        Self::InvalidSource(msg.into())
    }

    pub fn no_valid_detections(msg: impl Into<String>) -> Self {
        Self::NoValidDetections(msg.into())
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::InconsistentAvatar(msg.into())
    }

    pub fn encoding_failed(msg: impl Into<String>) -> Self {
        Self::EncodingFailed(msg.into())
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::PipelineAborted(msg.into())
    }

    /// Map a source-reading failure onto the request taxonomy.
    pub fn from_source_error(err: MediaError) -> Self {
        match err {
            MediaError::FileNotFound(path) => Self::not_found(format!("source {}", path.display())),
            MediaError::InvalidVideo(msg) => Self::invalid_source(msg),
            other => Self::Media(other),
        }
    }

    /// Map an engine failure while encoding the caller's audio.
    pub fn from_audio_error(err: MlClientError) -> Self {
        if err.is_input_error() {
            Self::invalid_source(format!("audio could not be encoded: {}", err))
        } else {
            Self::Engine(err)
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => Self::not_found(format!("avatar {}", id)),
            StorageError::Inconsistent { avatar_id, reason } => {
                Self::inconsistent(format!("{}: {}", avatar_id, reason))
            }
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_storage_errors_map_to_taxonomy() {
        let err: PipelineError = StorageError::not_found("alice").into();
        assert!(matches!(err, PipelineError::NotFound(_)));

        let err: PipelineError = StorageError::inconsistent("alice", "short coords").into();
        assert!(matches!(err, PipelineError::InconsistentAvatar(_)));
    }

    #[test]
    fn test_source_errors_map_to_taxonomy() {
        let err = PipelineError::from_source_error(MediaError::FileNotFound(PathBuf::from("/x.mp4")));
        assert!(matches!(err, PipelineError::NotFound(_)));

        let err = PipelineError::from_source_error(MediaError::InvalidVideo("garbage".into()));
        assert!(matches!(err, PipelineError::InvalidSource(_)));

        let err = PipelineError::from_source_error(MediaError::Timeout(5));
        assert!(matches!(err, PipelineError::Media(_)));
    }

    #[test]
    fn test_audio_errors_map_to_taxonomy() {
        let err = PipelineError::from_audio_error(MlClientError::Status {
            status: 400,
            body: "not audio".into(),
        });
        assert!(matches!(err, PipelineError::InvalidSource(_)));

        let err = PipelineError::from_audio_error(MlClientError::unavailable("down"));
        assert!(matches!(err, PipelineError::Engine(_)));
    }
}
