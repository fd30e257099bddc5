//! Pixel-space bounding boxes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, `(x1, y1)` inclusive and
/// `(x2, y2)` exclusive.
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct BBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BBox {
    /// Create a new box.
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Width in pixels (zero for degenerate boxes).
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    /// Height in pixels (zero for degenerate boxes).
    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    /// True when the box covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// True when the box lies fully inside a `width` x `height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        !self.is_empty() && self.x2 <= width && self.y2 <= height
    }

    /// Clip the box to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.min(width),
            y1: self.y1.min(height),
            x2: self.x2.min(width),
            y2: self.y2.min(height),
        }
    }

    /// Extend the lower edge by `margin`, never past `frame_height`.
    pub fn with_lower_margin(&self, margin: u32, frame_height: u32) -> Self {
        Self {
            y2: self.y2.saturating_add(margin).min(frame_height),
            ..*self
        }
    }
}

impl From<[u32; 4]> for BBox {
    fn from([x1, y1, x2, y2]: [u32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BBox> for [u32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions() {
        let b = BBox::new(10, 20, 110, 220);
        assert_eq!(b.width(), 100);
        assert_eq!(b.height(), 200);
        assert!(!b.is_empty());
        assert!(BBox::new(5, 5, 5, 9).is_empty());
    }

    #[test]
    fn test_lower_margin_is_clamped() {
        let b = BBox::new(0, 0, 50, 90);
        assert_eq!(b.with_lower_margin(10, 200).y2, 100);
        assert_eq!(b.with_lower_margin(10, 95).y2, 95);
        assert_eq!(b.with_lower_margin(10, 95).x2, 50);
    }

    #[test]
    fn test_fits_within() {
        let b = BBox::new(0, 0, 64, 64);
        assert!(b.fits_within(64, 64));
        assert!(!b.fits_within(63, 64));
        assert_eq!(b.clamp_to(32, 48), BBox::new(0, 0, 32, 48));
    }

    #[test]
    fn test_serializes_as_array() {
        let b = BBox::new(1, 2, 3, 4);
        assert_eq!(serde_json::to_string(&b).unwrap(), "[1,2,3,4]");
        let back: BBox = serde_json::from_str("[1,2,3,4]").unwrap();
        assert_eq!(back, b);
    }
}
