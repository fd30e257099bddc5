//! Avatar preprocessing: source video to a cyclic artifact set.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, info};

use talkhead_media::image_ops::{crop_resize, load_rgb};
use talkhead_media::{extract_frames, FaceDetector, FaceMasker, FfmpegRunner, RgbImage};
use talkhead_ml_client::InferenceEngine;
use talkhead_models::encoding::MODEL_INPUT_SIZE;
use talkhead_models::{avatar::is_margin_aware, AvatarId, AvatarInfo, BBox, Latent};
use talkhead_storage::{Avatar, AvatarStore};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::RequestLogger;
use crate::metrics;

/// A request to (re)build an avatar.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub avatar_id: AvatarId,
    /// Video file or directory of stills
    pub source: PathBuf,
    pub bbox_shift: i32,
    pub force_recreation: bool,
}

/// Builds avatar artifact sets and writes them through the store.
pub struct Preprocessor {
    config: Arc<PipelineConfig>,
    store: Arc<AvatarStore>,
    engine: Arc<dyn InferenceEngine>,
    detector: Arc<dyn FaceDetector>,
    masker: Arc<dyn FaceMasker>,
}

impl Preprocessor {
    pub fn new(
        config: Arc<PipelineConfig>,
        store: Arc<AvatarStore>,
        engine: Arc<dyn InferenceEngine>,
        detector: Arc<dyn FaceDetector>,
        masker: Arc<dyn FaceMasker>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            detector,
            masker,
        }
    }

    /// Whether a request can reuse the artifact set already on disk.
    pub fn is_reusable(&self, request: &BuildRequest) -> bool {
        !request.force_recreation && self.store.is_consistent(&request.avatar_id, request.bbox_shift)
    }

    /// Discard any existing artifact set and build a new one.
    ///
    /// On failure no artifact directory remains for the id.
    pub async fn build(&self, request: &BuildRequest, logger: &RequestLogger) -> PipelineResult<Avatar> {
        let started = Instant::now();
        let id = request.avatar_id.clone();
        logger.log_start(&format!("building from {}", request.source.display()));

        let store = Arc::clone(&self.store);
        let remove_id = id.clone();
        let removed = tokio::task::spawn_blocking(move || store.remove(&remove_id))
            .await
            .map_err(|e| PipelineError::aborted(format!("remove task failed: {}", e)))??;
        if removed {
            debug!(avatar_id = %id, "Discarded previous artifact set");
        }

        let work_dir = tempfile::Builder::new().prefix("talkhead-extract-").tempdir()?;
        let runner = FfmpegRunner::new()
            .with_binary(&self.config.ffmpeg_binary)
            .with_timeout(self.config.ffmpeg_timeout.as_secs());

        let extract_started = Instant::now();
        let frame_paths = extract_frames(&runner, &request.source, work_dir.path())
            .await
            .map_err(PipelineError::from_source_error)?;
        metrics::record_ffmpeg_duration("extract", extract_started.elapsed().as_secs_f64());
        logger.log_progress(&format!("frames_extracted={}", frame_paths.len()));

        let job = BuildJob {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            engine: Arc::clone(&self.engine),
            detector: Arc::clone(&self.detector),
            masker: Arc::clone(&self.masker),
            request: request.clone(),
            frame_paths,
        };
        let span = logger.span();
        let result = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            job.run()
        })
        .await
        .map_err(|e| PipelineError::aborted(format!("preprocess task failed: {}", e)))?;

        // The extraction scratch space is removed when `work_dir` drops.
        drop(work_dir);

        match result {
            Ok(avatar) => {
                metrics::record_preprocess_duration(true, started.elapsed().as_secs_f64());
                logger.log_completion(&format!(
                    "cycle_len={} in {:.1}s",
                    avatar.cycle_len(),
                    started.elapsed().as_secs_f64()
                ));
                Ok(avatar)
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                Err(e)
            }
        }
    }
}

/// CPU-bound part of a build, run on a blocking thread.
struct BuildJob {
    config: Arc<PipelineConfig>,
    store: Arc<AvatarStore>,
    engine: Arc<dyn InferenceEngine>,
    detector: Arc<dyn FaceDetector>,
    masker: Arc<dyn FaceMasker>,
    request: BuildRequest,
    frame_paths: Vec<PathBuf>,
}

impl BuildJob {
    fn run(self) -> PipelineResult<Avatar> {
        let id = &self.request.avatar_id;
        let extracted = self.frame_paths.len();

        let frames = self
            .frame_paths
            .par_iter()
            .map(|p| load_rgb(p).map_err(PipelineError::from_source_error))
            .collect::<PipelineResult<Vec<RgbImage>>>()?;

        let detections = frames
            .par_iter()
            .map(|frame| self.detect(frame))
            .collect::<PipelineResult<Vec<Option<BBox>>>>()?;

        let accepted: Vec<(RgbImage, BBox)> = frames
            .into_iter()
            .zip(detections)
            .filter_map(|(frame, bbox)| bbox.map(|b| (frame, b)))
            .collect();

        info!(
            avatar_id = %id,
            frames_extracted = extracted,
            accepted = accepted.len(),
            "Face detection finished"
        );
        if accepted.is_empty() {
            return Err(PipelineError::no_valid_detections(format!(
                "no face found in any of {} frames of {}",
                extracted,
                self.request.source.display()
            )));
        }

        let latents = accepted
            .par_iter()
            .map(|(frame, bbox)| -> PipelineResult<Latent> {
                let face = crop_resize(frame, *bbox, MODEL_INPUT_SIZE)?;
                Ok(self.engine.encode_latent(&face)?)
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        // Forward pass followed by its exact reverse
        let (forward_frames, forward_coords): (Vec<_>, Vec<_>) = accepted.into_iter().unzip();
        let frames = mirror(forward_frames);
        let coords = mirror(forward_coords);
        let latents = mirror(latents);

        let mask_mode = self.config.mask_mode();
        let (masks, mask_coords): (Vec<_>, Vec<_>) = frames
            .par_iter()
            .zip(coords.par_iter())
            .map(|(frame, bbox)| self.masker.compute_mask(frame, *bbox, mask_mode))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .unzip();

        let avatar = Avatar {
            info: AvatarInfo {
                avatar_id: id.clone(),
                source_path: self.request.source.display().to_string(),
                bbox_shift: self.request.bbox_shift,
                version: self.config.version.clone(),
                cycle_len: frames.len(),
                extra_margin: self.config.extra_margin,
                mask_mode,
                created_at: Utc::now(),
            },
            frames,
            coords,
            latents,
            masks,
            mask_coords,
        };

        self.store.save(&avatar)?;
        info!(avatar_id = %id, cycle_len = avatar.cycle_len(), "Avatar built");
        Ok(avatar)
    }

    /// Detect, apply the lower margin and reject unusable boxes.
    fn detect(&self, frame: &RgbImage) -> PipelineResult<Option<BBox>> {
        let (width, height) = frame.dimensions();
        let Some(bbox) = self.detector.detect(frame, self.request.bbox_shift)? else {
            return Ok(None);
        };

        let mut bbox = bbox.clamp_to(width, height);
        if is_margin_aware(&self.config.version) {
            bbox = bbox.with_lower_margin(self.config.extra_margin, height);
        }
        Ok(bbox.fits_within(width, height).then_some(bbox))
    }
}

fn mirror<T: Clone>(mut forward: Vec<T>) -> Vec<T> {
    let reversed: Vec<T> = forward.iter().rev().cloned().collect();
    forward.extend(reversed);
    forward
}
