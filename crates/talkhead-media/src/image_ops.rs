//! Image crop, resize and codec helpers.

use image::imageops::{self, FilterType};
use image::{ImageOutputFormat, RgbImage};
use std::io::Cursor;

use talkhead_models::BBox;

use crate::error::{MediaError, MediaResult};

/// Copy the `bbox` region out of `frame`.
pub fn crop(frame: &RgbImage, bbox: BBox) -> MediaResult<RgbImage> {
    if !bbox.fits_within(frame.width(), frame.height()) {
        return Err(MediaError::invalid_geometry(format!(
            "box {:?} outside {}x{} frame",
            bbox,
            frame.width(),
            frame.height()
        )));
    }
    Ok(imageops::crop_imm(frame, bbox.x1, bbox.y1, bbox.width(), bbox.height()).to_image())
}

/// Crop `bbox` and resize it to a `size` x `size` square with Lanczos3.
pub fn crop_resize(frame: &RgbImage, bbox: BBox, size: u32) -> MediaResult<RgbImage> {
    let region = crop(frame, bbox)?;
    Ok(imageops::resize(&region, size, size, FilterType::Lanczos3))
}

/// Resize `img` to exactly fill `bbox`.
pub fn resize_to_box(img: &RgbImage, bbox: BBox) -> MediaResult<RgbImage> {
    if bbox.is_empty() {
        return Err(MediaError::invalid_geometry(format!("empty box {:?}", bbox)));
    }
    if img.width() == bbox.width() && img.height() == bbox.height() {
        return Ok(img.clone());
    }
    Ok(imageops::resize(img, bbox.width(), bbox.height(), FilterType::Lanczos3))
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> MediaResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Jpeg(quality.clamp(1, 100)))?;
    Ok(buf.into_inner())
}

/// Encode an RGB image as PNG.
pub fn encode_png(img: &RgbImage) -> MediaResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Png)?;
    Ok(buf.into_inner())
}

/// Decode any supported image format into RGB.
pub fn decode_rgb(bytes: &[u8]) -> MediaResult<RgbImage> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Load an image file as RGB.
pub fn load_rgb(path: &std::path::Path) -> MediaResult<RgbImage> {
    Ok(image::open(path)?.to_rgb8())
}
