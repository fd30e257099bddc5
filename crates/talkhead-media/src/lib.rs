//! FFmpeg CLI wrapper and image collaborators for avatar synthesis.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with progress parsing
//! - Timeouts via tokio
//! - Frame extraction, image-sequence encoding and audio muxing
//! - Crop/resize/codec helpers on `image` buffers
//! - Face detection, masking and blending traits with built-in
//!   masker and blender implementations

pub mod blending;
pub mod command;
pub mod error;
pub mod frames;
pub mod fs_utils;
pub mod image_ops;
pub mod masking;
pub mod progress;
pub mod sequence;
pub mod vision;

pub use blending::MaskBlender;
pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use frames::extract_frames;
pub use fs_utils::move_file;
pub use masking::LowerFaceMasker;
pub use progress::FfmpegProgress;
pub use sequence::{encode_image_sequence, mux_audio};
pub use vision::{FaceDetector, FaceMasker, FrameBlender};

// Re-export image types used across the collaborator traits
pub use image::{GrayImage, RgbImage};
