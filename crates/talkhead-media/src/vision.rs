//! Collaborator traits for face-region work.
//!
//! These traits give the preprocessor and the streaming compositor a uniform
//! interface over detection, masking and blending. All methods are
//! synchronous and are called from blocking worker threads.

use image::{GrayImage, RgbImage};

use talkhead_models::{BBox, MaskMode};

use crate::error::MediaResult;

/// Face detection provider.
pub trait FaceDetector: Send + Sync {
    /// Detect the face region of a single frame.
    ///
    /// `bbox_shift` moves the detected region vertically by the given number
    /// of pixels before it is returned.
    ///
    /// # Returns
    /// `None` when the frame has no usable face.
    fn detect(&self, frame: &RgbImage, bbox_shift: i32) -> MediaResult<Option<BBox>>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Blend-mask provider.
pub trait FaceMasker: Send + Sync {
    /// Compute the blend mask for `bbox` inside `frame`.
    ///
    /// # Returns
    /// The grayscale mask and the crop box of `frame` it applies to. The mask
    /// dimensions equal the crop box dimensions.
    fn compute_mask(&self, frame: &RgbImage, bbox: BBox, mode: MaskMode) -> MediaResult<(GrayImage, BBox)>;
}

/// Compositor pasting a generated face region back into a source frame.
pub trait FrameBlender: Send + Sync {
    /// Blend `generated` (already sized to `bbox`) into a copy of `original`,
    /// weighting by `mask` over the `mask_crop` region.
    fn blend(
        &self,
        original: &RgbImage,
        generated: &RgbImage,
        bbox: BBox,
        mask: &GrayImage,
        mask_crop: BBox,
    ) -> MediaResult<RgbImage>;
}
