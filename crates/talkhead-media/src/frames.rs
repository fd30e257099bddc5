//! Still-frame extraction from a source video or image directory.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use talkhead_models::encoding::{frame_file_name, frame_file_pattern};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::sorted_files_with_extensions;

/// Image extensions accepted when the source is a directory of stills.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Extract every frame of `source` into `out_dir` as sequential PNGs.
///
/// A directory source has its images re-encoded as PNG in lexicographic
/// order; any other path is decoded with FFmpeg. Returns the written frame
/// paths in order.
pub async fn extract_frames(
    runner: &FfmpegRunner,
    source: &Path,
    out_dir: &Path,
) -> MediaResult<Vec<PathBuf>> {
    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return Err(MediaError::FileNotFound(source.to_path_buf()));
    }
    tokio::fs::create_dir_all(out_dir).await?;

    let frames = if tokio::fs::metadata(source).await?.is_dir() {
        let source = source.to_path_buf();
        let out_dir = out_dir.to_path_buf();
        tokio::task::spawn_blocking(move || copy_image_dir(&source, &out_dir))
            .await
            .map_err(|e| MediaError::Io(std::io::Error::other(e)))??
    } else {
        decode_video(runner, source, out_dir).await?
    };

    if frames.is_empty() {
        return Err(MediaError::InvalidVideo(format!(
            "no frames could be read from {}",
            source.display()
        )));
    }

    info!(source = %source.display(), frames = frames.len(), "Extracted source frames");
    Ok(frames)
}

async fn decode_video(runner: &FfmpegRunner, source: &Path, out_dir: &Path) -> MediaResult<Vec<PathBuf>> {
    let cmd = FfmpegCommand::new(source, out_dir.join(frame_file_pattern("png")))
        .output_args(["-vsync", "0", "-start_number", "0"])
        .log_level("error");

    runner.run(&cmd).await.map_err(|e| match e {
        MediaError::FfmpegFailed { stderr, .. } => MediaError::InvalidVideo(
            stderr.unwrap_or_else(|| format!("FFmpeg could not decode {}", source.display())),
        ),
        other => other,
    })?;

    sorted_files_with_extensions(out_dir, &["png"])
}

/// Re-encode the stills of `source` into `out_dir` as `%08d.png`.
pub fn copy_image_dir(source: &Path, out_dir: &Path) -> MediaResult<Vec<PathBuf>> {
    let inputs = sorted_files_with_extensions(source, IMAGE_EXTENSIONS)?;
    let mut written = Vec::with_capacity(inputs.len());

    for (i, input) in inputs.iter().enumerate() {
        let img = image::open(input)
            .map_err(|e| MediaError::InvalidVideo(format!("{}: {}", input.display(), e)))?
            .to_rgb8();
        let dst = out_dir.join(frame_file_name(i, "png"));
        img.save(&dst)?;
        written.push(dst);
    }

    debug!(source = %source.display(), frames = written.len(), "Copied still images");
    Ok(written)
}
