//! Avatar lifecycle and synthesis pipelines.
//!
//! This crate provides:
//! - Avatar preprocessing with reuse of consistent artifact sets
//! - An in-memory avatar cache with single-flight loading
//! - Two-stage streaming synthesis (prediction, composition)
//! - Batch assembly of streamed frames into an MP4 with audio
//! - Request-scoped logging and pipeline metrics

pub mod assembler;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod preprocess;
pub mod service;
pub mod streaming;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use assembler::BatchAssembler;
pub use cache::AvatarCache;
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use logging::RequestLogger;
pub use preprocess::{BuildRequest, Preprocessor};
pub use service::{AvatarService, Collaborators, PreprocessOutcome};
pub use streaming::{FrameStream, PipelineStats};
