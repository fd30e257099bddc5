//! Output encoding configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Pixel format for broad player compatibility
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";
/// Default CRF (Constant Rate Factor) for the assembled video
pub const DEFAULT_CRF: u8 = 18;
/// Default output frame rate
pub const DEFAULT_FPS: u32 = 25;
/// Default JPEG quality of streamed frames
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Side length of the square face crop fed to the model.
pub const MODEL_INPUT_SIZE: u32 = 256;

/// Zero-padded width of sequential frame filenames (`00000000.png`).
pub const FRAME_INDEX_WIDTH: usize = 8;

/// Format a sequential frame filename.
pub fn frame_file_name(index: usize, extension: &str) -> String {
    format!("{:0width$}.{}", index, extension, width = FRAME_INDEX_WIDTH)
}

/// FFmpeg input pattern matching [`frame_file_name`].
pub fn frame_file_pattern(extension: &str) -> String {
    format!("%0{}d.{}", FRAME_INDEX_WIDTH, extension)
}

/// Video encoding configuration for batch assembly.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Output pixel format
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,

    /// Frames per second of the image sequence
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_pixel_format() -> String {
    DEFAULT_PIXEL_FORMAT.to_string()
}
fn default_fps() -> u32 {
    DEFAULT_FPS
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            crf: DEFAULT_CRF,
            pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
            fps: DEFAULT_FPS,
        }
    }
}

impl EncodingConfig {
    /// Returns a new config with updated frame rate.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Convert to FFmpeg output arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-vcodec".to_string(),
            self.codec.clone(),
            "-vf".to_string(),
            format!("format={}", self.pixel_format),
            "-crf".to_string(),
            self.crf.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_file_name() {
        assert_eq!(frame_file_name(7, "jpg"), "00000007.jpg");
        assert_eq!(frame_file_pattern("jpg"), "%08d.jpg");
    }

    #[test]
    fn test_default_ffmpeg_args() {
        let args = EncodingConfig::default().to_ffmpeg_args();
        assert_eq!(
            args,
            vec!["-vcodec", "libx264", "-vf", "format=yuv420p", "-crf", "18"]
        );
    }

    #[test]
    fn test_with_fps() {
        assert_eq!(EncodingConfig::default().with_fps(30).fps, 30);
    }
}
