//! Built-in masked paste compositor.

use image::{imageops, GrayImage, RgbImage};

use talkhead_models::BBox;

use crate::error::{MediaError, MediaResult};
use crate::vision::FrameBlender;

/// Pastes the generated face into the frame, then alpha-blends the pasted
/// frame over the original inside the mask crop.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskBlender;

impl FrameBlender for MaskBlender {
    fn blend(
        &self,
        original: &RgbImage,
        generated: &RgbImage,
        bbox: BBox,
        mask: &GrayImage,
        mask_crop: BBox,
    ) -> MediaResult<RgbImage> {
        let (width, height) = original.dimensions();
        if !bbox.fits_within(width, height) || !mask_crop.fits_within(width, height) {
            return Err(MediaError::blend_failed(format!(
                "boxes {:?}/{:?} outside {}x{} frame",
                bbox, mask_crop, width, height
            )));
        }
        if generated.dimensions() != (bbox.width(), bbox.height()) {
            return Err(MediaError::blend_failed(format!(
                "generated region is {:?}, face box is {}x{}",
                generated.dimensions(),
                bbox.width(),
                bbox.height()
            )));
        }
        if mask.dimensions() != (mask_crop.width(), mask_crop.height()) {
            return Err(MediaError::blend_failed(format!(
                "mask is {:?}, crop box is {}x{}",
                mask.dimensions(),
                mask_crop.width(),
                mask_crop.height()
            )));
        }

        let mut pasted = original.clone();
        imageops::replace(&mut pasted, generated, bbox.x1 as i64, bbox.y1 as i64);

        let mut out = original.clone();
        for (mx, my, alpha) in mask.enumerate_pixels() {
            let a = alpha[0] as u32;
            if a == 0 {
                continue;
            }
            let (x, y) = (mask_crop.x1 + mx, mask_crop.y1 + my);
            let src = pasted.get_pixel(x, y);
            let dst = out.get_pixel_mut(x, y);
            for c in 0..3 {
                dst[c] = ((src[c] as u32 * a + dst[c] as u32 * (255 - a) + 127) / 255) as u8;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_opaque_mask_pastes_generated() {
        let original = RgbImage::from_pixel(40, 40, Rgb([0, 0, 0]));
        let generated = RgbImage::from_pixel(10, 10, Rgb([200, 100, 50]));
        let bbox = BBox::new(10, 10, 20, 20);
        let crop = BBox::new(5, 5, 25, 25);
        let mask = GrayImage::from_pixel(20, 20, Luma([255]));

        let out = MaskBlender.blend(&original, &generated, bbox, &mask, crop).unwrap();
        assert_eq!(out.get_pixel(15, 15), &Rgb([200, 100, 50]));
        assert_eq!(out.get_pixel(7, 7), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(30, 30), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_transparent_mask_keeps_original() {
        let original = RgbImage::from_pixel(40, 40, Rgb([9, 9, 9]));
        let generated = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        let bbox = BBox::new(10, 10, 20, 20);
        let mask = GrayImage::new(20, 20);

        let out = MaskBlender
            .blend(&original, &generated, bbox, &mask, BBox::new(5, 5, 25, 25))
            .unwrap();
        assert_eq!(out, original);
    }

    #[test]
    fn test_half_mask_mixes() {
        let original = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        let generated = RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]));
        let full = BBox::new(0, 0, 20, 20);
        let mask = GrayImage::from_pixel(20, 20, Luma([128]));

        let out = MaskBlender.blend(&original, &generated, full, &mask, full).unwrap();
        assert_eq!(out.get_pixel(3, 3), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_size_mismatch_fails() {
        let original = RgbImage::new(40, 40);
        let generated = RgbImage::new(8, 8);
        let mask = GrayImage::new(20, 20);
        let err = MaskBlender
            .blend(&original, &generated, BBox::new(10, 10, 20, 20), &mask, BBox::new(5, 5, 25, 25))
            .unwrap_err();
        assert!(matches!(err, MediaError::BlendFailed(_)));
    }
}
