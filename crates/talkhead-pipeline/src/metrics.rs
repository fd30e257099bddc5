//! Pipeline metrics.
//!
//! Recorded through the global `metrics` recorder; the API binary installs
//! the Prometheus exporter.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_EMITTED_TOTAL: &str = "talkhead_frames_emitted_total";
    pub const FRAMES_DROPPED_TOTAL: &str = "talkhead_frames_dropped_total";
    pub const PREPROCESS_DURATION_SECONDS: &str = "talkhead_preprocess_duration_seconds";
    pub const FFMPEG_DURATION_SECONDS: &str = "talkhead_ffmpeg_duration_seconds";
}

/// Record one composed frame handed to the consumer.
pub fn record_frame_emitted() {
    counter!(names::FRAMES_EMITTED_TOTAL).increment(1);
}

/// Record one frame skipped after a composition failure.
pub fn record_frame_dropped() {
    counter!(names::FRAMES_DROPPED_TOTAL).increment(1);
}

/// Record a preprocessing run, labelled by whether it rebuilt the avatar.
pub fn record_preprocess_duration(rebuilt: bool, duration_secs: f64) {
    let labels = [("rebuilt", rebuilt.to_string())];
    histogram!(names::PREPROCESS_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an FFmpeg step (`extract`, `encode`, `mux`).
pub fn record_ffmpeg_duration(step: &'static str, duration_secs: f64) {
    let labels = [("step", step)];
    histogram!(names::FFMPEG_DURATION_SECONDS, &labels).record(duration_secs);
}
