//! Composition root tying the store, cache and pipelines together.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::info;

use talkhead_media::{FaceDetector, FaceMasker, FrameBlender, LowerFaceMasker, MaskBlender};
use talkhead_ml_client::{InferenceEngine, SerializedEngine};
use talkhead_models::AvatarId;
use talkhead_storage::{Avatar, AvatarStore};

use crate::assembler::BatchAssembler;
use crate::cache::AvatarCache;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::RequestLogger;
use crate::metrics;
use crate::preprocess::{BuildRequest, Preprocessor};
use crate::streaming::{start_stream, FrameStream, StreamSettings};

/// External capabilities the service runs on.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn InferenceEngine>,
    pub detector: Arc<dyn FaceDetector>,
    pub masker: Arc<dyn FaceMasker>,
    pub blender: Arc<dyn FrameBlender>,
}

impl Collaborators {
    /// Use the built-in masker and blender.
    pub fn new(engine: Arc<dyn InferenceEngine>, detector: Arc<dyn FaceDetector>) -> Self {
        Self {
            engine,
            detector,
            masker: Arc::new(LowerFaceMasker::default()),
            blender: Arc::new(MaskBlender),
        }
    }
}

/// Result of a preprocessing request.
#[derive(Debug, Clone)]
pub struct PreprocessOutcome {
    pub avatar: Arc<Avatar>,
    /// False when an existing consistent set was reused
    pub rebuilt: bool,
}

/// Avatar lifecycle and synthesis entry points.
pub struct AvatarService {
    config: Arc<PipelineConfig>,
    store: Arc<AvatarStore>,
    cache: AvatarCache,
    engine: Arc<dyn InferenceEngine>,
    blender: Arc<dyn FrameBlender>,
    preprocessor: Preprocessor,
    assembler: BatchAssembler,
    build_locks: Mutex<HashMap<AvatarId, Arc<Mutex<()>>>>,
}

impl AvatarService {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(AvatarStore::new(&config.results_dir, &config.version));

        let engine: Arc<dyn InferenceEngine> = if config.serialize_inference {
            Arc::new(SerializedEngine::new(collaborators.engine))
        } else {
            collaborators.engine
        };

        let preprocessor = Preprocessor::new(
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&engine),
            collaborators.detector,
            collaborators.masker,
        );

        info!(
            results_dir = %config.results_dir.display(),
            version = %config.version,
            engine = engine.name(),
            serialize_inference = config.serialize_inference,
            "Avatar service ready"
        );

        Self {
            cache: AvatarCache::new(Arc::clone(&store)),
            assembler: BatchAssembler::new(Arc::clone(&config)),
            blender: collaborators.blender,
            build_locks: Mutex::new(HashMap::new()),
            config,
            store,
            engine,
            preprocessor,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &AvatarStore {
        &self.store
    }

    pub fn cache(&self) -> &AvatarCache {
        &self.cache
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Avatars with a complete record on disk.
    pub async fn list_avatars(&self) -> PipelineResult<Vec<AvatarId>> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.list())
            .await
            .map_err(|e| PipelineError::aborted(format!("list task failed: {}", e)))?
            .map_err(PipelineError::from)
    }

    /// Avatars currently held in memory.
    pub async fn loaded_avatars(&self) -> Vec<AvatarId> {
        self.cache.loaded_ids().await
    }

    /// Build an avatar, or reuse the existing one when it is consistent
    /// with the request and recreation is not forced.
    ///
    /// A stored set built with a different `bbox_shift` is recreated.
    pub async fn preprocess(&self, request: BuildRequest, logger: &RequestLogger) -> PipelineResult<PreprocessOutcome> {
        let started = Instant::now();
        let lock = self.build_lock(&request.avatar_id).await;
        let _guard = lock.lock().await;

        if self.preprocessor.is_reusable(&request) {
            let avatar = self.cache.get_or_load(&request.avatar_id).await?;
            logger.log_completion("reused existing artifact set");
            metrics::record_preprocess_duration(false, started.elapsed().as_secs_f64());
            return Ok(PreprocessOutcome { avatar, rebuilt: false });
        }

        self.cache.invalidate(&request.avatar_id).await;
        let avatar = Arc::new(self.preprocessor.build(&request, logger).await?);
        self.cache.insert(Arc::clone(&avatar)).await;
        Ok(PreprocessOutcome { avatar, rebuilt: true })
    }

    /// Loaded avatar for synthesis.
    ///
    /// With `expected_bbox_shift`, a stored avatar built with a different
    /// shift is reported as inconsistent instead of being used.
    pub async fn avatar_for(&self, id: &AvatarId, expected_bbox_shift: Option<i32>) -> PipelineResult<Arc<Avatar>> {
        let avatar = self.cache.get_or_load(id).await?;
        match expected_bbox_shift {
            Some(shift) if !avatar.info.matches_bbox_shift(shift) => Err(PipelineError::inconsistent(format!(
                "avatar {} was built with bbox_shift {}, request expects {}",
                id, avatar.info.bbox_shift, shift
            ))),
            _ => Ok(avatar),
        }
    }

    /// Start streaming frames for an audio clip on disk.
    pub async fn stream(&self, id: &AvatarId, audio: &Path, logger: &RequestLogger) -> PipelineResult<FrameStream> {
        let avatar = self.avatar_for(id, None).await?;
        let bytes = read_audio(audio).await?;
        self.stream_avatar(avatar, bytes, logger).await
    }

    /// Start streaming frames for in-memory audio.
    pub async fn stream_avatar(
        &self,
        avatar: Arc<Avatar>,
        audio: Vec<u8>,
        logger: &RequestLogger,
    ) -> PipelineResult<FrameStream> {
        logger.log_start("streaming synthesis");
        start_stream(
            Arc::clone(&self.engine),
            Arc::clone(&self.blender),
            avatar,
            audio,
            StreamSettings::from(self.config.as_ref()),
            logger,
        )
        .await
    }

    /// Synthesize a complete video file.
    ///
    /// Without an explicit destination the file goes to the default
    /// inference output path.
    pub async fn assemble(
        &self,
        id: &AvatarId,
        audio: &Path,
        destination: Option<PathBuf>,
        logger: &RequestLogger,
    ) -> PipelineResult<PathBuf> {
        let stream = self.stream(id, audio, logger).await?;
        let destination = destination.unwrap_or_else(|| self.assembler.default_destination(id, audio));
        self.assembler.assemble(stream, audio, &destination, logger).await
    }

    async fn build_lock(&self, id: &AvatarId) -> Arc<Mutex<()>> {
        let mut locks = self.build_locks.lock().await;
        Arc::clone(locks.entry(id.clone()).or_default())
    }
}

async fn read_audio(path: &Path) -> PipelineResult<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Err(PipelineError::invalid_source(format!(
            "audio clip {} is empty",
            path.display()
        ))),
        Ok(bytes) => Ok(bytes),
        Err(e) => Err(PipelineError::invalid_source(format!(
            "audio clip {} is unreadable: {}",
            path.display(),
            e
        ))),
    }
}
