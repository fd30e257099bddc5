//! Model inference for the avatar pipeline.
//!
//! This crate provides:
//! - The [`InferenceEngine`] capability trait
//! - [`SerializedEngine`] for one-call-at-a-time engines
//! - [`MlClient`], an HTTP client for the model sidecar implementing
//!   both [`InferenceEngine`] and `FaceDetector`

pub mod client;
pub mod engine;
pub mod error;

pub use client::{MlClient, MlClientConfig, SidecarHealth};
pub use engine::{check_batch, InferenceEngine, SerializedEngine};
pub use error::{MlClientError, MlResult};
