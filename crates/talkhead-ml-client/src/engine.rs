//! Model Inference Engine capability.

use std::sync::{Arc, Mutex};

use talkhead_media::RgbImage;
use talkhead_models::{AudioFeature, Latent};

use crate::error::{MlClientError, MlResult};

/// Stateless model compute used by preprocessing and streaming.
///
/// Implementations are shared across requests and called from blocking
/// worker threads.
pub trait InferenceEngine: Send + Sync {
    /// Encode an audio clip into one conditioning chunk per output frame.
    fn encode_audio(&self, audio: &[u8]) -> MlResult<Vec<AudioFeature>>;

    /// Encode a model-resolution face crop into its latent.
    fn encode_latent(&self, face: &RgbImage) -> MlResult<Latent>;

    /// Run one batch through the generator and decoder.
    ///
    /// `features` and `latents` are index-aligned; one image is returned
    /// per pair.
    fn predict_and_decode(&self, features: &[AudioFeature], latents: &[Latent]) -> MlResult<Vec<RgbImage>>;

    /// Engine name for logging.
    fn name(&self) -> &'static str;
}

/// Wraps an engine so that at most one call runs at a time.
pub struct SerializedEngine {
    inner: Arc<dyn InferenceEngine>,
    lock: Mutex<()>,
}

impl SerializedEngine {
    pub fn new(inner: Arc<dyn InferenceEngine>) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }

    fn guarded<T>(&self, f: impl FnOnce(&dyn InferenceEngine) -> MlResult<T>) -> MlResult<T> {
        // A poisoned lock only means another call panicked; the engine
        // itself holds no state behind it.
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(self.inner.as_ref())
    }
}

impl InferenceEngine for SerializedEngine {
    fn encode_audio(&self, audio: &[u8]) -> MlResult<Vec<AudioFeature>> {
        self.guarded(|e| e.encode_audio(audio))
    }

    fn encode_latent(&self, face: &RgbImage) -> MlResult<Latent> {
        self.guarded(|e| e.encode_latent(face))
    }

    fn predict_and_decode(&self, features: &[AudioFeature], latents: &[Latent]) -> MlResult<Vec<RgbImage>> {
        self.guarded(|e| e.predict_and_decode(features, latents))
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Check the batch arguments every engine expects.
pub fn check_batch(features: &[AudioFeature], latents: &[Latent]) -> MlResult<()> {
    if features.len() != latents.len() {
        return Err(MlClientError::invalid_input(format!(
            "{} audio features for {} latents",
            features.len(),
            latents.len()
        )));
    }
    if features.is_empty() {
        return Err(MlClientError::invalid_input("empty batch"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use talkhead_models::Tensor;

    /// Records the highest number of overlapping calls.
    #[derive(Default)]
    struct OverlapProbe {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InferenceEngine for OverlapProbe {
        fn encode_audio(&self, _audio: &[u8]) -> MlResult<Vec<AudioFeature>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn encode_latent(&self, _face: &RgbImage) -> MlResult<Latent> {
            Ok(Tensor::new(vec![1], vec![0.0]).unwrap())
        }

        fn predict_and_decode(&self, _f: &[AudioFeature], _l: &[Latent]) -> MlResult<Vec<RgbImage>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &'static str {
            "probe"
        }
    }

    #[test]
    fn test_serialized_engine_never_overlaps() {
        let probe = Arc::new(OverlapProbe::default());
        let engine = Arc::new(SerializedEngine::new(probe.clone()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || engine.encode_audio(b"x").unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
        assert_eq!(engine.name(), "probe");
    }

    #[test]
    fn test_check_batch() {
        let t = Tensor::new(vec![1], vec![0.0]).unwrap();
        assert!(check_batch(&[t.clone()], &[t.clone()]).is_ok());
        assert!(check_batch(&[t.clone()], &[]).is_err());
        assert!(check_batch(&[], &[]).is_err());
    }
}
