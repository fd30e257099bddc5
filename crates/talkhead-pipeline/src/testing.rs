//! Deterministic collaborators and fixtures for tests.
//!
//! Fake frames encode their identity in pixel values so that tests can
//! recover which source frame and which audio chunk produced an output
//! JPEG:
//! - cycle frame `k` is filled with gray level [`frame_shade`]`(k)`
//! - the generated face for audio chunk `i` is gray level [`chunk_shade`]`(i)`

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use image::{GrayImage, Luma, Rgb, RgbImage};

use talkhead_media::{FaceDetector, FrameBlender, MaskBlender, MediaError, MediaResult};
use talkhead_ml_client::{check_batch, InferenceEngine, MlClientError, MlResult};
use talkhead_models::{AudioFeature, AvatarId, AvatarInfo, BBox, Latent, MaskMode, Tensor};
use talkhead_storage::Avatar;

/// Side of fake frames.
pub const FRAME_SIZE: u32 = 64;

/// Face box used by fake frames and the fake detector.
pub const FACE_BOX: BBox = BBox {
    x1: 16,
    y1: 16,
    x2: 48,
    y2: 48,
};

/// Mask crop used by fake avatars.
pub const MASK_BOX: BBox = BBox {
    x1: 8,
    y1: 8,
    x2: 56,
    y2: 56,
};

/// Gray level of cycle frame `k`.
pub fn frame_shade(k: usize) -> u8 {
    (20 + (k % 10) * 20) as u8
}

/// Gray level generated for audio chunk `i`.
pub fn chunk_shade(i: usize) -> u8 {
    ((i * 8) % 256) as u8
}

/// Build a mirrored avatar with `half` distinct forward frames.
///
/// Masks are opaque over the face box only, so a composed frame shows the
/// generated face inside [`FACE_BOX`] and the cycle frame elsewhere.
pub fn sample_avatar(id: &str, bbox_shift: i32, half: usize) -> Avatar {
    let forward: Vec<RgbImage> = (0..half)
        .map(|k| {
            let s = frame_shade(k);
            RgbImage::from_pixel(FRAME_SIZE, FRAME_SIZE, Rgb([s, s, s]))
        })
        .collect();
    let mut frames = forward.clone();
    frames.extend(forward.into_iter().rev());

    let n = frames.len();
    let latents = (0..n)
        .map(|k| {
            let forward_k = if k < half { k } else { n - 1 - k };
            Tensor {
                shape: vec![1],
                values: vec![forward_k as f32],
            }
        })
        .collect();

    let mut mask = GrayImage::new(MASK_BOX.width(), MASK_BOX.height());
    for y in FACE_BOX.y1..FACE_BOX.y2 {
        for x in FACE_BOX.x1..FACE_BOX.x2 {
            mask.put_pixel(x - MASK_BOX.x1, y - MASK_BOX.y1, Luma([255]));
        }
    }

    Avatar {
        info: AvatarInfo {
            avatar_id: AvatarId::parse(id).unwrap_or_else(|e| panic!("bad test avatar id {id}: {e}")),
            source_path: format!("/fixtures/{}.mp4", id),
            bbox_shift,
            version: "v15".to_string(),
            cycle_len: n,
            extra_margin: 10,
            mask_mode: MaskMode::Jaw,
            created_at: Utc::now(),
        },
        frames,
        coords: vec![FACE_BOX; n],
        latents,
        masks: vec![mask; n],
        mask_coords: vec![MASK_BOX; n],
    }
}

/// Write `count` PNG stills into `dir`. Frames listed in `faceless` are
/// marked so that [`FakeDetector`] finds no face in them.
pub fn write_source_frames(dir: &Path, count: usize, faceless: &[usize]) {
    std::fs::create_dir_all(dir).unwrap_or_else(|e| panic!("create {}: {e}", dir.display()));
    for k in 0..count {
        let s = frame_shade(k);
        let mut img = RgbImage::from_pixel(FRAME_SIZE, FRAME_SIZE, Rgb([s, s, s]));
        if faceless.contains(&k) {
            img.put_pixel(0, 0, Rgb([0, 255, 0]));
        }
        let path = dir.join(format!("frame_{:03}.png", k));
        img.save(&path)
            .unwrap_or_else(|e| panic!("write {}: {e}", path.display()));
    }
}

/// Audio clip the fake engine turns into `frames` chunks.
pub fn audio_clip(frames: usize) -> Vec<u8> {
    vec![0u8; frames]
}

/// Read the gray level at `(x, y)` of an encoded frame.
pub fn shade_at(jpeg: &[u8], x: u32, y: u32) -> u8 {
    let img = image::load_from_memory(jpeg)
        .unwrap_or_else(|e| panic!("decode frame: {e}"))
        .to_rgb8();
    img.get_pixel(x, y)[0]
}

/// True when two gray levels agree within JPEG noise.
pub fn shade_close(a: u8, b: u8) -> bool {
    (a as i16 - b as i16).abs() <= 4
}

/// Engine producing one chunk per audio byte and solid generated faces.
#[derive(Default)]
pub struct FakeEngine {
    /// Fail every `predict_and_decode` call from this batch on
    pub fail_from_batch: Option<usize>,
    /// Sleep inside every `predict_and_decode` call
    pub predict_delay: Option<Duration>,
    /// Extra images appended to the batches selected by `extra_on_chunk`
    pub extra_images: usize,
    /// Only the batch holding this audio chunk gets extras (every batch when unset)
    pub extra_on_chunk: Option<usize>,
    /// Images dropped from the end of every batch
    pub missing_images: usize,
    predict_calls: AtomicUsize,
    latent_calls: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_from_batch(batch: usize) -> Self {
        Self {
            fail_from_batch: Some(batch),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            predict_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Append `extra` images to every batch.
    pub fn with_extra_images(extra: usize) -> Self {
        Self {
            extra_images: extra,
            ..Self::default()
        }
    }

    /// Append `extra` images only to the batch holding audio chunk `chunk`.
    pub fn with_extra_images_on_chunk(extra: usize, chunk: usize) -> Self {
        Self {
            extra_images: extra,
            extra_on_chunk: Some(chunk),
            ..Self::default()
        }
    }

    /// Return `missing` fewer images than requested from every batch.
    pub fn with_missing_images(missing: usize) -> Self {
        Self {
            missing_images: missing,
            ..Self::default()
        }
    }

    pub fn predict_calls(&self) -> usize {
        self.predict_calls.load(Ordering::SeqCst)
    }

    pub fn latent_calls(&self) -> usize {
        self.latent_calls.load(Ordering::SeqCst)
    }
}

impl InferenceEngine for FakeEngine {
    fn encode_audio(&self, audio: &[u8]) -> MlResult<Vec<AudioFeature>> {
        if audio.is_empty() {
            return Err(MlClientError::invalid_input("empty audio"));
        }
        // Chunk values are frame indices
        Ok((0..audio.len())
            .map(|i| Tensor {
                shape: vec![1],
                values: vec![i as f32],
            })
            .collect())
    }

    fn encode_latent(&self, face: &RgbImage) -> MlResult<Latent> {
        self.latent_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Tensor {
            shape: vec![1],
            values: vec![face.get_pixel(0, 0)[0] as f32],
        })
    }

    fn predict_and_decode(&self, features: &[AudioFeature], latents: &[Latent]) -> MlResult<Vec<RgbImage>> {
        check_batch(features, latents)?;
        let batch = self.predict_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.predict_delay {
            std::thread::sleep(delay);
        }
        if matches!(self.fail_from_batch, Some(from) if batch >= from) {
            return Err(MlClientError::unavailable(format!("fake failure in batch {}", batch)));
        }

        let mut images: Vec<RgbImage> = features
            .iter()
            .map(|f| {
                let s = chunk_shade(f.values[0] as usize);
                RgbImage::from_pixel(8, 8, Rgb([s, s, s]))
            })
            .collect();
        let gets_extras = match self.extra_on_chunk {
            Some(chunk) => features.iter().any(|f| f.values[0] as usize == chunk),
            None => true,
        };
        if gets_extras {
            images.extend((0..self.extra_images).map(|_| RgbImage::new(8, 8)));
        }
        images.truncate(images.len().saturating_sub(self.missing_images));
        Ok(images)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Detector returning [`FACE_BOX`] shifted by `bbox_shift`, except on
/// frames marked by [`write_source_frames`].
#[derive(Debug, Default)]
pub struct FakeDetector;

impl FaceDetector for FakeDetector {
    fn detect(&self, frame: &RgbImage, bbox_shift: i32) -> MediaResult<Option<BBox>> {
        if frame.get_pixel(0, 0) == &Rgb([0, 255, 0]) {
            return Ok(None);
        }
        let shift = |v: u32| (v as i32 + bbox_shift).clamp(0, FRAME_SIZE as i32) as u32;
        Ok(Some(BBox::new(FACE_BOX.x1, shift(FACE_BOX.y1), FACE_BOX.x2, shift(FACE_BOX.y2))))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Blender failing on every `fail_every`-th call (1-based) and delegating
/// to [`MaskBlender`] otherwise.
pub struct FlakyBlender {
    fail_every: usize,
    calls: AtomicUsize,
}

impl FlakyBlender {
    pub fn new(fail_every: usize) -> Self {
        Self {
            fail_every: fail_every.max(1),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FrameBlender for FlakyBlender {
    fn blend(
        &self,
        original: &RgbImage,
        generated: &RgbImage,
        bbox: BBox,
        mask: &GrayImage,
        mask_crop: BBox,
    ) -> MediaResult<RgbImage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.fail_every == 0 {
            return Err(MediaError::blend_failed(format!("fake failure on call {}", call)));
        }
        MaskBlender.blend(original, generated, bbox, mask, mask_crop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_avatar_is_aligned_and_mirrored() {
        let avatar = sample_avatar("fixture", 0, 5);
        assert_eq!(avatar.cycle_len(), 10);
        assert!(avatar.check_aligned().is_ok());
        assert!(avatar.is_mirrored());
    }

    #[test]
    fn test_detector_skips_marked_frames() {
        let dir = tempfile::TempDir::new().unwrap();
        write_source_frames(dir.path(), 2, &[1]);
        let a = image::open(dir.path().join("frame_000.png")).unwrap().to_rgb8();
        let b = image::open(dir.path().join("frame_001.png")).unwrap().to_rgb8();
        assert!(FakeDetector.detect(&a, 0).unwrap().is_some());
        assert!(FakeDetector.detect(&b, 0).unwrap().is_none());
    }
}
