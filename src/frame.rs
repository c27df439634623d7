use image::RgbImage;
use std::time::Instant;

use crate::FaceBox;

/// Decoded camera frame tagged with its acquisition order and time.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Strictly increasing per source, starting at 1.
    pub seq: u64,
    pub captured_at: Instant,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(seq: u64, image: RgbImage) -> Self {
        Self {
            seq,
            captured_at: Instant::now(),
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Copy out the region under `face`, clamped to the image.
///
/// Returns `None` for a box with no area left after clamping.
pub fn crop_face(image: &RgbImage, face: &FaceBox) -> Option<RgbImage> {
    let b = face.clamp(image.width(), image.height())?;
    let crop = image::imageops::crop_imm(
        image,
        b.x1 as u32,
        b.y1 as u32,
        b.width() as u32,
        b.height() as u32,
    );
    Some(crop.to_image())
}
