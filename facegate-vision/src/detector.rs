use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};
use std::path::Path;

use crate::face::{FaceBox, FaceDetector};

/// SSD (ResNet-10) detector input is a fixed 300x300 BGR blob
pub const SSD_INPUT_SIZE: u32 = 300;
const SSD_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];
/// Each detection row: [image_id, label, confidence, x1, y1, x2, y2]
const SSD_ROW_LEN: usize = 7;

/// ONNX export of the OpenCV ResNet-10 SSD face detector.
pub struct OnnxFaceDetector {
    session: Session,
    confidence: f32,
}

impl OnnxFaceDetector {
    pub fn load(path: &Path, confidence: f32) -> Result<Self> {
        Ok(Self {
            session: crate::model::load_session(path)?,
            confidence,
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect_largest(&mut self, image: &RgbImage) -> Result<Option<FaceBox>> {
        let blob = to_blob(image)?;
        let input_tensor = Value::from_array(blob)?;

        let outputs = self.session.run(ort::inputs![input_tensor])?;
        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("reading detector output")?;

        Ok(decode_largest(
            data,
            self.confidence,
            image.width(),
            image.height(),
        ))
    }
}

/// Resize to the SSD input and lay out as mean-subtracted BGR planes [1, 3, H, W].
pub fn to_blob(image: &RgbImage) -> Result<Array4<f32>> {
    let size = SSD_INPUT_SIZE;
    let resized = image::imageops::resize(image, size, size, FilterType::Triangle);

    let pixel_count = (size * size) as usize;
    let mut input_data = vec![0.0f32; 3 * pixel_count];
    let (b_channel, rest) = input_data.split_at_mut(pixel_count);
    let (g_channel, r_channel) = rest.split_at_mut(pixel_count);

    for (i, pixel) in resized.pixels().enumerate() {
        b_channel[i] = pixel[2] as f32 - SSD_MEAN_BGR[0];
        g_channel[i] = pixel[1] as f32 - SSD_MEAN_BGR[1];
        r_channel[i] = pixel[0] as f32 - SSD_MEAN_BGR[2];
    }

    Ok(Array4::from_shape_vec(
        (1, 3, size as usize, size as usize),
        input_data,
    )?)
}

/// Pick the largest-area detection at or above `confidence`.
///
/// Coordinates are normalized to the input image; the result is scaled to
/// `width` x `height` and clamped to the last valid pixel.
pub fn decode_largest(rows: &[f32], confidence: f32, width: u32, height: u32) -> Option<FaceBox> {
    let w = width as f32;
    let h = height as f32;

    let mut best = None;
    let mut best_area = 0;

    for row in rows.chunks_exact(SSD_ROW_LEN) {
        if row[2].is_nan() || row[2] < confidence {
            continue;
        }

        let candidate = FaceBox::new(
            ((row[3] * w) as i32).max(0),
            ((row[4] * h) as i32).max(0),
            ((row[5] * w) as i32).min(width as i32 - 1),
            ((row[6] * h) as i32).min(height as i32 - 1),
        );

        let area = candidate.area();
        if area > best_area {
            best_area = area;
            best = Some(candidate);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(conf: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> [f32; 7] {
        [0.0, 1.0, conf, x1, y1, x2, y2]
    }

    #[test]
    fn test_decode_picks_largest_confident_box() {
        let mut rows = Vec::new();
        rows.extend_from_slice(&row(0.9, 0.125, 0.125, 0.25, 0.25));
        rows.extend_from_slice(&row(0.7, 0.5, 0.5, 0.875, 0.875));
        // Largest but below threshold
        rows.extend_from_slice(&row(0.3, 0.0, 0.0, 1.0, 1.0));

        let b = decode_largest(&rows, 0.6, 64, 64).unwrap();
        assert_eq!(b, FaceBox::new(32, 32, 56, 56));
    }

    #[test]
    fn test_decode_clamps_to_image() {
        let rows = row(0.95, -0.1, -0.2, 1.3, 1.1);
        let b = decode_largest(&rows, 0.6, 640, 480).unwrap();
        assert_eq!(b, FaceBox::new(0, 0, 639, 479));
    }

    #[test]
    fn test_decode_ignores_zero_area() {
        let rows = row(0.95, 0.5, 0.5, 0.5, 0.8);
        assert_eq!(decode_largest(&rows, 0.6, 640, 480), None);
    }

    #[test]
    fn test_decode_skips_nan_confidence() {
        let rows = row(f32::NAN, 0.125, 0.125, 0.5, 0.5);
        assert_eq!(decode_largest(&rows, 0.6, 64, 64), None);

        let mut rows = row(f32::NAN, 0.0, 0.0, 1.0, 1.0).to_vec();
        rows.extend_from_slice(&row(0.9, 0.125, 0.125, 0.25, 0.25));
        assert_eq!(
            decode_largest(&rows, 0.6, 64, 64),
            Some(FaceBox::new(8, 8, 16, 16))
        );
    }

    #[test]
    fn test_decode_empty_output() {
        assert_eq!(decode_largest(&[], 0.6, 640, 480), None);
    }

    #[test]
    fn test_blob_layout_is_bgr_mean_subtracted() {
        let img = RgbImage::from_pixel(32, 24, image::Rgb([10, 200, 150]));
        let blob = to_blob(&img).unwrap();
        assert_eq!(blob.shape(), &[1, 3, 300, 300]);
        assert!((blob[[0, 0, 0, 0]] - (150.0 - 104.0)).abs() <= 1.0);
        assert!((blob[[0, 1, 10, 10]] - (200.0 - 177.0)).abs() <= 1.0);
        assert!((blob[[0, 2, 299, 299]] - (10.0 - 123.0)).abs() <= 1.0);
    }
}
