//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use talkhead_models::encoding::{DEFAULT_FPS, DEFAULT_JPEG_QUALITY};
use talkhead_models::{EncodingConfig, MaskMode, PREPROCESSING_VERSION};

/// Preprocessing and synthesis settings shared by every request.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of avatars, uploads and inference outputs
    pub results_dir: PathBuf,
    /// Preprocessing format tag
    pub version: String,
    /// Output frame rate of assembled videos
    pub fps: u32,
    /// Frames per model call
    pub batch_size: usize,
    /// Lower face-box margin in margin-aware versions
    pub extra_margin: u32,
    /// Mask mode for margin-aware versions
    pub parsing_mode: MaskMode,
    /// JPEG quality of streamed frames
    pub jpeg_quality: u8,
    /// Fraction of dropped frames past which a stream fails
    pub max_dropped_frame_ratio: f64,
    /// Run at most one engine call at a time
    pub serialize_inference: bool,
    /// FFmpeg executable
    pub ffmpeg_binary: PathBuf,
    /// Upper bound of a single FFmpeg invocation
    pub ffmpeg_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("./results"),
            version: PREPROCESSING_VERSION.to_string(),
            fps: DEFAULT_FPS,
            batch_size: 20,
            extra_margin: 10,
            parsing_mode: MaskMode::Jaw,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_dropped_frame_ratio: 0.5,
            serialize_inference: false,
            ffmpeg_binary: PathBuf::from("ffmpeg"),
            ffmpeg_timeout: Duration::from_secs(600),
        }
    }
}

impl PipelineConfig {
    /// Create config from `TALKHEAD_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            results_dir: std::env::var("TALKHEAD_RESULT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_dir),
            version: std::env::var("TALKHEAD_VERSION").unwrap_or(defaults.version),
            fps: std::env::var("TALKHEAD_FPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&fps| fps > 0)
                .unwrap_or(defaults.fps),
            batch_size: std::env::var("TALKHEAD_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.batch_size),
            extra_margin: std::env::var("TALKHEAD_EXTRA_MARGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.extra_margin),
            parsing_mode: std::env::var("TALKHEAD_PARSING_MODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.parsing_mode),
            jpeg_quality: std::env::var("TALKHEAD_JPEG_QUALITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|q| (1..=100).contains(q))
                .unwrap_or(defaults.jpeg_quality),
            max_dropped_frame_ratio: std::env::var("TALKHEAD_MAX_DROPPED_FRAME_RATIO")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_dropped_frame_ratio),
            serialize_inference: std::env::var("TALKHEAD_SERIALIZE_INFERENCE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.serialize_inference),
            ffmpeg_binary: std::env::var("TALKHEAD_FFMPEG_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_binary),
            ffmpeg_timeout: Duration::from_secs(
                std::env::var("TALKHEAD_FFMPEG_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }

    /// Capacity of the channel between prediction and composition.
    pub fn inter_stage_capacity(&self) -> usize {
        2 * self.batch_size.max(1)
    }

    /// Capacity of the channel feeding the consumer.
    pub fn output_capacity(&self) -> usize {
        4 * self.batch_size.max(1)
    }

    /// Mask mode in effect for the configured version.
    pub fn mask_mode(&self) -> MaskMode {
        MaskMode::for_version(&self.version, self.parsing_mode)
    }

    /// Image-sequence encoding settings for batch assembly.
    pub fn encoding(&self) -> EncodingConfig {
        EncodingConfig::default().with_fps(self.fps)
    }

    /// Where uploaded sources and audio clips are kept.
    pub fn uploads_dir(&self) -> PathBuf {
        self.results_dir.join("uploads")
    }

    /// Where assembled videos are written.
    pub fn inference_dir(&self) -> PathBuf {
        self.results_dir.join("inference")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_capacities() {
        let config = PipelineConfig {
            batch_size: 8,
            ..Default::default()
        };
        assert_eq!(config.inter_stage_capacity(), 16);
        assert_eq!(config.output_capacity(), 32);
    }

    #[test]
    fn test_mask_mode_follows_version() {
        let mut config = PipelineConfig {
            parsing_mode: MaskMode::Neck,
            ..Default::default()
        };
        assert_eq!(config.mask_mode(), MaskMode::Neck);
        config.version = "v1".to_string();
        assert_eq!(config.mask_mode(), MaskMode::Raw);
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.version, "v15");
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.encoding().fps, 25);
        assert!(config.uploads_dir().ends_with("uploads"));
    }
}
