//! Two-stage streaming synthesis.
//!
//! ```text
//! encode_audio ──► [prediction] ──PredictionEvent──► [composition] ──JPEG──► FrameStream
//!                  blocking thread   2*batch_size     blocking thread  4*batch_size
//! ```
//!
//! Both stages run on the blocking pool and talk over bounded channels, so
//! a slow consumer throttles composition, which throttles prediction.
//! Dropping the [`FrameStream`] closes the output channel and raises a
//! cancel flag; each stage exits on its next send or model call.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use talkhead_media::image_ops::{encode_jpeg, resize_to_box};
use talkhead_media::{FrameBlender, RgbImage};
use talkhead_ml_client::{InferenceEngine, MlClientError};
use talkhead_models::{AudioFeature, Latent};
use talkhead_storage::Avatar;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::RequestLogger;
use crate::metrics;

/// Message from the prediction stage to the composition stage.
pub enum PredictionEvent {
    /// One decoded face crop, in output order
    Frame(RgbImage),
    /// All frames were produced
    Finished,
    /// Prediction stopped early
    Failed(PipelineError),
}

/// Per-stream settings taken from [`PipelineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub batch_size: usize,
    pub jpeg_quality: u8,
    pub max_dropped_frame_ratio: f64,
    pub inter_stage_capacity: usize,
    pub output_capacity: usize,
}

impl From<&PipelineConfig> for StreamSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            jpeg_quality: config.jpeg_quality,
            max_dropped_frame_ratio: config.max_dropped_frame_ratio,
            inter_stage_capacity: config.inter_stage_capacity(),
            output_capacity: config.output_capacity(),
        }
    }
}

/// Shared frame counters of one stream.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    emitted: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

impl PipelineStats {
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Ordered JPEG frames of one synthesis request.
pub struct FrameStream {
    rx: mpsc::Receiver<PipelineResult<Bytes>>,
    video_num: usize,
    stats: PipelineStats,
    cancel: Arc<AtomicBool>,
}

impl FrameStream {
    /// Number of frames the audio clip drives.
    pub fn video_num(&self) -> usize {
        self.video_num
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }
}

impl Stream for FrameStream {
    type Item = PipelineResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.rx.close();
    }
}

/// Encode `audio` and start both stages for `avatar`.
///
/// Fails up front with `InvalidSource` when the clip is empty or the
/// engine cannot read it.
pub async fn start_stream(
    engine: Arc<dyn InferenceEngine>,
    blender: Arc<dyn FrameBlender>,
    avatar: Arc<Avatar>,
    audio: Vec<u8>,
    settings: StreamSettings,
    logger: &RequestLogger,
) -> PipelineResult<FrameStream> {
    if audio.is_empty() {
        return Err(PipelineError::invalid_source("audio clip is empty"));
    }
    if avatar.cycle_len() == 0 {
        return Err(PipelineError::inconsistent(format!("avatar {} has no frames", avatar.id())));
    }

    let audio_engine = Arc::clone(&engine);
    let features = tokio::task::spawn_blocking(move || audio_engine.encode_audio(&audio))
        .await
        .map_err(|e| PipelineError::aborted(format!("audio encoding task failed: {}", e)))?
        .map_err(PipelineError::from_audio_error)?;
    if features.is_empty() {
        return Err(PipelineError::invalid_source("audio clip produced no frames"));
    }

    let video_num = features.len();
    logger.log_progress(&format!("video_num={} cycle_len={}", video_num, avatar.cycle_len()));

    let (event_tx, event_rx) = mpsc::channel(settings.inter_stage_capacity.max(1));
    let (frame_tx, frame_rx) = mpsc::channel(settings.output_capacity.max(1));
    let cancel = Arc::new(AtomicBool::new(false));
    let stats = PipelineStats::default();

    let prediction = PredictionStage {
        engine,
        avatar: Arc::clone(&avatar),
        features,
        batch_size: settings.batch_size.max(1),
        tx: event_tx,
        cancel: Arc::clone(&cancel),
    };
    let composition = CompositionStage {
        blender,
        avatar,
        video_num,
        settings,
        rx: event_rx,
        tx: frame_tx,
        stats: stats.clone(),
    };

    let span = logger.span();
    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        prediction.run()
    });
    let span = logger.span();
    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        composition.run()
    });

    Ok(FrameStream {
        rx: frame_rx,
        video_num,
        stats,
        cancel,
    })
}

/// Stage 1: batched model calls.
struct PredictionStage {
    engine: Arc<dyn InferenceEngine>,
    avatar: Arc<Avatar>,
    features: Vec<AudioFeature>,
    batch_size: usize,
    tx: mpsc::Sender<PredictionEvent>,
    cancel: Arc<AtomicBool>,
}

impl PredictionStage {
    fn run(self) {
        let terminal = match self.predict_all() {
            Ok(()) => PredictionEvent::Finished,
            Err(e) => {
                if !matches!(e, PipelineError::PipelineAborted(_)) {
                    warn!(error = %e, "Prediction stage failed");
                }
                PredictionEvent::Failed(e)
            }
        };
        // Exactly one terminal event; the receiver may already be gone.
        let _ = self.tx.blocking_send(terminal);
    }

    fn predict_all(&self) -> PipelineResult<()> {
        let n = self.avatar.cycle_len();

        for (batch, chunk) in self.features.chunks(self.batch_size).enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::aborted("stream cancelled"));
            }

            let start = batch * self.batch_size;
            let latents: Vec<Latent> = (start..start + chunk.len())
                .map(|i| self.avatar.latents[i % n].clone())
                .collect();

            let images = self.engine.predict_and_decode(chunk, &latents)?;
            debug!(batch, frames = images.len(), "Predicted batch");

            // Surplus images are only tolerated after the final chunk, where
            // composition discards everything past video_num.
            let is_last = start + chunk.len() == self.features.len();
            if images.len() < chunk.len() || (images.len() > chunk.len() && !is_last) {
                return Err(MlClientError::invalid_response(format!(
                    "batch {} returned {} images for {} audio chunks",
                    batch,
                    images.len(),
                    chunk.len()
                ))
                .into());
            }

            for image in images {
                if self.tx.blocking_send(PredictionEvent::Frame(image)).is_err() {
                    return Err(PipelineError::aborted("composition stage stopped"));
                }
            }
        }
        Ok(())
    }
}

/// Stage 2: paste, blend and JPEG-encode in order.
struct CompositionStage {
    blender: Arc<dyn FrameBlender>,
    avatar: Arc<Avatar>,
    video_num: usize,
    settings: StreamSettings,
    rx: mpsc::Receiver<PredictionEvent>,
    tx: mpsc::Sender<PipelineResult<Bytes>>,
    stats: PipelineStats,
}

impl CompositionStage {
    fn run(mut self) {
        let mut idx = 0usize;

        let outcome = loop {
            match self.rx.blocking_recv() {
                Some(PredictionEvent::Frame(generated)) => {
                    // Frames past the audio length are discarded
                    if idx >= self.video_num {
                        continue;
                    }
                    let i = self.avatar.cycle_index(idx);
                    let frame_idx = idx;
                    idx += 1;

                    match self.compose(i, &generated) {
                        Ok(jpeg) => {
                            if self.tx.blocking_send(Ok(jpeg)).is_err() {
                                debug!(frame = frame_idx, "Consumer gone, stopping composition");
                                return;
                            }
                            self.stats.emitted.fetch_add(1, Ordering::SeqCst);
                            metrics::record_frame_emitted();
                        }
                        Err(e) => {
                            warn!(frame = frame_idx, cycle_index = i, error = %e, "Dropping frame");
                            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                            metrics::record_frame_dropped();
                        }
                    }
                }
                Some(PredictionEvent::Finished) => break self.finish(idx),
                Some(PredictionEvent::Failed(e)) => break Err(e),
                None => break Err(PipelineError::aborted("prediction stage ended without a result")),
            }
        };

        if let Err(e) = outcome {
            let _ = self.tx.blocking_send(Err(e));
        }
    }

    fn compose(&self, i: usize, generated: &RgbImage) -> PipelineResult<Bytes> {
        let bbox = self.avatar.coords[i];
        let face = resize_to_box(generated, bbox)?;
        let frame = self.blender.blend(
            &self.avatar.frames[i],
            &face,
            bbox,
            &self.avatar.masks[i],
            self.avatar.mask_coords[i],
        )?;
        Ok(Bytes::from(encode_jpeg(&frame, self.settings.jpeg_quality)?))
    }

    fn finish(&self, produced: usize) -> PipelineResult<()> {
        if produced < self.video_num {
            return Err(PipelineError::aborted(format!(
                "model produced {} of {} frames",
                produced, self.video_num
            )));
        }
        let dropped = self.stats.dropped();
        let ratio = dropped as f64 / self.video_num as f64;
        if ratio > self.settings.max_dropped_frame_ratio {
            return Err(PipelineError::encoding_failed(format!(
                "{} of {} frames failed to compose",
                dropped, self.video_num
            )));
        }
        if dropped > 0 {
            warn!(dropped, video_num = self.video_num, "Stream finished with dropped frames");
        }
        Ok(())
    }
}
