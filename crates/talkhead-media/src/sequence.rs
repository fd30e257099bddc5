//! Image-sequence encoding and audio muxing.

use std::path::Path;
use std::time::Instant;
use tracing::info;

use talkhead_models::encoding::frame_file_pattern;
use talkhead_models::EncodingConfig;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::progress::FfmpegProgress;

/// Build the command encoding `frames_dir/%08d.{ext}` into a silent video.
pub fn sequence_command(
    frames_dir: &Path,
    extension: &str,
    config: &EncodingConfig,
    output: &Path,
) -> FfmpegCommand {
    let pattern = frames_dir.join(frame_file_pattern(extension));
    FfmpegCommand::from_pattern(pattern.to_string_lossy(), output)
        .input_frame_rate(config.fps)
        .input_format("image2")
        .output_args(config.to_ffmpeg_args())
}

/// Build the command muxing `audio` with the silent `video` into `output`.
pub fn mux_command(audio: &Path, video: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(audio, output).add_input(video)
}

/// Turn FFmpeg progress snapshots into the written fraction of a
/// `total_frames` sequence.
pub fn fraction_reporter<F>(total_frames: u64, on_fraction: F) -> impl Fn(FfmpegProgress) + Send + 'static
where
    F: Fn(f64) + Send + 'static,
{
    move |progress| on_fraction(progress.frame_fraction(total_frames))
}

/// Encode an ordered image sequence of `total_frames` images into a
/// silent video, reporting the encoded fraction as FFmpeg advances.
pub async fn encode_image_sequence<F>(
    runner: &FfmpegRunner,
    frames_dir: &Path,
    extension: &str,
    config: &EncodingConfig,
    output: &Path,
    total_frames: u64,
    on_fraction: F,
) -> MediaResult<()>
where
    F: Fn(f64) + Send + 'static,
{
    let started = Instant::now();
    runner
        .run_with_progress(
            &sequence_command(frames_dir, extension, config, output),
            fraction_reporter(total_frames, on_fraction),
        )
        .await?;
    info!(
        output = %output.display(),
        fps = config.fps,
        frames = total_frames,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Encoded image sequence"
    );
    Ok(())
}

/// Combine an audio clip and a silent video into the final file.
pub async fn mux_audio(runner: &FfmpegRunner, audio: &Path, video: &Path, output: &Path) -> MediaResult<()> {
    let started = Instant::now();
    runner.run(&mux_command(audio, video, output)).await?;
    info!(
        output = %output.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Muxed audio track"
    );
    Ok(())
}
