//! FFmpeg progress reporting.

use serde::{Deserialize, Serialize};

/// Progress snapshot parsed from FFmpeg's `-progress` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Frames written so far
    pub frame: u64,
    /// Current encoding FPS
    pub fps: f64,
    /// Output position in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed relative to realtime
    pub speed: f64,
    /// Set once FFmpeg reports `progress=end`
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Fraction of an image sequence already written, in `0.0..=1.0`.
    pub fn frame_fraction(&self, total_frames: u64) -> f64 {
        if total_frames == 0 {
            return if self.is_complete { 1.0 } else { 0.0 };
        }
        (self.frame as f64 / total_frames as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_fraction() {
        let progress = FfmpegProgress {
            frame: 50,
            ..Default::default()
        };
        assert!((progress.frame_fraction(200) - 0.25).abs() < f64::EPSILON);
        assert!((progress.frame_fraction(10) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_frame_fraction_without_total() {
        let mut progress = FfmpegProgress::default();
        assert_eq!(progress.frame_fraction(0), 0.0);
        progress.is_complete = true;
        assert_eq!(progress.frame_fraction(0), 1.0);
    }
}
