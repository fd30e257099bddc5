//! Batch assembly: stream to frames on disk to a muxed MP4.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use talkhead_media::sequence::{encode_image_sequence, mux_audio};
use talkhead_media::{move_file, FfmpegRunner, MediaError};
use talkhead_models::encoding::frame_file_name;
use talkhead_models::AvatarId;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::RequestLogger;
use crate::metrics;
use crate::streaming::FrameStream;

/// Writes a frame stream to disk and muxes it with its audio clip.
pub struct BatchAssembler {
    config: Arc<PipelineConfig>,
}

impl BatchAssembler {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self { config }
    }

    /// `{results_dir}/inference/{avatar_id}_{audio_stem}_{uuid}.mp4`
    pub fn default_destination(&self, avatar_id: &AvatarId, audio: &Path) -> PathBuf {
        let stem = audio
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        self.config
            .inference_dir()
            .join(format!("{}_{}_{}.mp4", avatar_id, stem, Uuid::new_v4()))
    }

    /// Consume `stream` fully and produce `destination`.
    ///
    /// The scratch directory is removed whether or not assembly succeeds,
    /// and `destination` is only written once the final mux has finished.
    pub async fn assemble(
        &self,
        mut stream: FrameStream,
        audio: &Path,
        destination: &Path,
        logger: &RequestLogger,
    ) -> PipelineResult<PathBuf> {
        let started = Instant::now();
        let scratch = tempfile::Builder::new().prefix("talkhead-assemble-").tempdir()?;
        let video_num = stream.video_num();

        let mut written = 0usize;
        while let Some(frame) = stream.next().await {
            let jpeg = frame?;
            tokio::fs::write(scratch.path().join(frame_file_name(written, "jpg")), &jpeg).await?;
            written += 1;
        }
        drop(stream);

        if written == 0 {
            return Err(PipelineError::encoding_failed("no frames were produced"));
        }
        logger.log_progress(&format!("frames_written={} of {}", written, video_num));

        let runner = FfmpegRunner::new()
            .with_binary(&self.config.ffmpeg_binary)
            .with_timeout(self.config.ffmpeg_timeout.as_secs());

        let silent = scratch.path().join("silent.mp4");
        let encode_started = Instant::now();
        let encode_logger = logger.clone();
        encode_image_sequence(
            &runner,
            scratch.path(),
            "jpg",
            &self.config.encoding(),
            &silent,
            written as u64,
            move |fraction| encode_logger.log_progress(&format!("encoded={:.0}%", fraction * 100.0)),
        )
        .await
        .map_err(encoder_error)?;
        metrics::record_ffmpeg_duration("encode", encode_started.elapsed().as_secs_f64());

        let muxed = scratch.path().join("final.mp4");
        let mux_started = Instant::now();
        mux_audio(&runner, audio, &silent, &muxed).await.map_err(encoder_error)?;
        metrics::record_ffmpeg_duration("mux", mux_started.elapsed().as_secs_f64());

        move_file(&muxed, destination).await?;
        debug!(scratch = %scratch.path().display(), "Removing assembly scratch directory");

        logger.log_completion(&format!(
            "{} in {:.1}s",
            destination.display(),
            started.elapsed().as_secs_f64()
        ));
        Ok(destination.to_path_buf())
    }
}

fn encoder_error(err: MediaError) -> PipelineError {
    match err {
        MediaError::FfmpegFailed { message, stderr, .. } => PipelineError::encoding_failed(match stderr {
            Some(stderr) => format!("{}: {}", message, stderr),
            None => message,
        }),
        e if e.is_encoder_failure() => PipelineError::encoding_failed(e.to_string()),
        other => PipelineError::Media(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{start_stream, StreamSettings};
    use crate::testing::{audio_clip, sample_avatar, FakeEngine, FlakyBlender};
    use talkhead_media::MaskBlender;
    use tempfile::TempDir;

    fn assembler(root: &TempDir, ffmpeg: &str) -> BatchAssembler {
        BatchAssembler::new(Arc::new(PipelineConfig {
            results_dir: root.path().to_path_buf(),
            ffmpeg_binary: PathBuf::from(ffmpeg),
            ..Default::default()
        }))
    }

    fn logger() -> RequestLogger {
        RequestLogger::new("batch", &AvatarId::parse("alice").unwrap())
    }

    async fn stream(frames: usize, blender_fail_every: Option<usize>) -> FrameStream {
        let blender: Arc<dyn talkhead_media::FrameBlender> = match blender_fail_every {
            Some(n) => Arc::new(FlakyBlender::new(n)),
            None => Arc::new(MaskBlender),
        };
        start_stream(
            Arc::new(FakeEngine::new()),
            blender,
            Arc::new(sample_avatar("alice", 0, 3)),
            audio_clip(frames),
            StreamSettings::from(&PipelineConfig::default()),
            &logger(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_default_destination() {
        let root = TempDir::new().unwrap();
        let dest = assembler(&root, "ffmpeg")
            .default_destination(&AvatarId::parse("alice").unwrap(), Path::new("/up/hello.wav"));
        let name = dest.file_name().unwrap().to_string_lossy().to_string();

        assert!(dest.starts_with(root.path().join("inference")));
        assert!(name.starts_with("alice_hello_"));
        assert!(name.ends_with(".mp4"));
    }

    #[tokio::test]
    async fn test_stream_failure_propagates() {
        let root = TempDir::new().unwrap();
        let dest = root.path().join("out.mp4");
        let err = assembler(&root, "ffmpeg")
            .assemble(stream(4, Some(1)).await, Path::new("a.wav"), &dest, &logger())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::EncodingFailed(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_missing_encoder_fails_without_output() {
        let root = TempDir::new().unwrap();
        let dest = root.path().join("out.mp4");
        let err = assembler(&root, "no-such-ffmpeg-binary")
            .assemble(stream(4, None).await, Path::new("a.wav"), &dest, &logger())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::EncodingFailed(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_assemble_with_ffmpeg() {
        let root = TempDir::new().unwrap();
        let audio = root.path().join("tone.wav");
        let status = tokio::process::Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-f", "lavfi", "-i", "sine=frequency=440:duration=1"])
            .arg(&audio)
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let dest = root.path().join("inference").join("out.mp4");
        let out = assembler(&root, "ffmpeg")
            .assemble(stream(25, None).await, &audio, &dest, &logger())
            .await
            .unwrap();
        assert_eq!(out, dest);
        assert!(std::fs::metadata(&dest).unwrap().len() > 0);
    }
}
