//! Shared data models for the talking-head avatar service.
//!
//! This crate provides Serde-serializable types for:
//! - Avatar identity and the declared preprocessing record
//! - Face bounding boxes and mask crop boxes
//! - Latent and audio conditioning tensors exchanged with the model service
//! - Encoding constants shared by the pipeline and the muxer

pub mod avatar;
pub mod bbox;
pub mod encoding;
pub mod mask_mode;
pub mod tensor;

// Re-export common types
pub use avatar::{AvatarId, AvatarIdError, AvatarInfo, PREPROCESSING_VERSION};
pub use bbox::BBox;
pub use encoding::EncodingConfig;
pub use mask_mode::{MaskMode, MaskModeParseError};
pub use tensor::{AudioFeature, Latent, Tensor, TensorError};
