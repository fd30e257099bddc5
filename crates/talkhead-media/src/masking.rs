//! Built-in lower-face blend masks.

use image::{imageops, GrayImage, Luma, RgbImage};

use talkhead_models::{BBox, MaskMode};

use crate::error::{MediaError, MediaResult};
use crate::vision::FaceMasker;

/// Feathered rectangular mask over the mouth region of a face box.
///
/// The crop box is the face box grown by `expand` around its centre and
/// clipped to the frame. Inside it the mask is opaque over:
/// - `raw`: the whole face box
/// - `jaw`: the lower half of the face box
/// - `neck`: the lower half of the face box down to the crop bottom
///
/// and then blurred so the paste has no hard seam.
#[derive(Debug, Clone)]
pub struct LowerFaceMasker {
    /// Crop box scale relative to the face box
    pub expand: f32,
    /// Gaussian sigma of the feathering blur, relative to the face width
    pub feather: f32,
}

impl Default for LowerFaceMasker {
    fn default() -> Self {
        Self {
            expand: 1.5,
            feather: 0.05,
        }
    }
}

impl LowerFaceMasker {
    /// Crop box around `bbox` for a `width` x `height` frame.
    pub fn crop_box(&self, bbox: BBox, width: u32, height: u32) -> BBox {
        let cx = (bbox.x1 + bbox.x2) as f32 / 2.0;
        let cy = (bbox.y1 + bbox.y2) as f32 / 2.0;
        let half = (bbox.width().max(bbox.height()) as f32 * self.expand) / 2.0;

        let x1 = (cx - half).max(0.0) as u32;
        let y1 = (cy - half).max(0.0) as u32;
        let x2 = (cx + half).ceil() as u32;
        let y2 = (cy + half).ceil() as u32;
        BBox::new(x1, y1, x2, y2).clamp_to(width, height)
    }
}

impl FaceMasker for LowerFaceMasker {
    fn compute_mask(&self, frame: &RgbImage, bbox: BBox, mode: MaskMode) -> MediaResult<(GrayImage, BBox)> {
        let (width, height) = frame.dimensions();
        if !bbox.fits_within(width, height) {
            return Err(MediaError::mask_failed(format!(
                "face box {:?} outside {}x{} frame",
                bbox, width, height
            )));
        }

        let crop = self.crop_box(bbox, width, height);
        let mut mask = GrayImage::new(crop.width(), crop.height());

        // Opaque region in crop-local coordinates
        let mid_y = bbox.y1 + bbox.height() / 2;
        let (top, bottom) = match mode {
            MaskMode::Raw => (bbox.y1, bbox.y2),
            MaskMode::Jaw => (mid_y, bbox.y2),
            MaskMode::Neck => (mid_y, crop.y2),
        };
        for y in top.max(crop.y1)..bottom.min(crop.y2) {
            for x in bbox.x1.max(crop.x1)..bbox.x2.min(crop.x2) {
                mask.put_pixel(x - crop.x1, y - crop.y1, Luma([255]));
            }
        }

        let sigma = (bbox.width() as f32 * self.feather).max(0.5);
        Ok((imageops::blur(&mask, sigma), crop))
    }
}
