//! Local filesystem storage for preprocessed avatars.
//!
//! This crate provides:
//! - The [`Avatar`] artifact set and its alignment checks
//! - [`AvatarStore`] with staged, record-last saves and consistency checks
//! - Gzip-compressed JSON latent codec

pub mod avatar;
pub mod error;
pub mod latent_codec;
pub mod store;

pub use avatar::Avatar;
pub use error::{StorageError, StorageResult};
pub use latent_codec::{compress_latents, decompress_latents};
pub use store::AvatarStore;
