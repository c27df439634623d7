use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned face box in pixel corners: (x1, y1) top-left, (x2, y2) bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl FaceBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn centroid(&self) -> (f32, f32) {
        (
            (self.x1 + self.x2) as f32 / 2.0,
            (self.y1 + self.y2) as f32 / 2.0,
        )
    }

    /// Clamp the box to a `width` x `height` image.
    ///
    /// Returns `None` when nothing of the box is left inside the image, which
    /// callers treat as a degenerate crop.
    pub fn clamp(&self, width: u32, height: u32) -> Option<FaceBox> {
        let w = width as i32;
        let h = height as i32;
        let clamped = FaceBox {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        };
        if clamped.x1 >= clamped.x2 || clamped.y1 >= clamped.y2 {
            return None;
        }
        Some(clamped)
    }
}

/// L2-normalized face embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }

    /// Build an embedding from raw model output, normalizing it to unit length.
    pub fn normalized(mut vector: Vec<f32>) -> Self {
        l2_normalize(&mut vector);
        Self { vector }
    }

    pub fn norm(&self) -> f32 {
        self.vector.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }
}

/// Turns an image into the bounding box of its largest face.
///
/// Implementations may hold inference state, hence `&mut self`.
pub trait FaceDetector: Send {
    fn detect_largest(&mut self, image: &RgbImage) -> Result<Option<FaceBox>>;
}

/// Turns a cropped face into a unit-norm embedding of fixed length.
pub trait FaceEmbedder: Send {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding>;
}

pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm + 1e-9;
    for x in vector.iter_mut() {
        *x /= denom;
    }
}

/// Raw dot product of two embeddings.
///
/// This is the cosine similarity when both sides are L2-normalized, which is
/// assumed and not re-checked.
pub fn match_embedding(a: &Embedding, b: &Embedding) -> f32 {
    a.vector
        .iter()
        .zip(b.vector.iter())
        .map(|(x, y)| x * y)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid() {
        let b = FaceBox::new(10, 10, 60, 60);
        assert_eq!(b.centroid(), (35.0, 35.0));
        assert_eq!(b.area(), 2500);
    }

    #[test]
    fn test_clamp_inside_is_identity() {
        let b = FaceBox::new(10, 10, 60, 60);
        assert_eq!(b.clamp(640, 480), Some(b));
    }

    #[test]
    fn test_clamp_partially_outside() {
        let b = FaceBox::new(-20, 400, 100, 520);
        assert_eq!(b.clamp(640, 480), Some(FaceBox::new(0, 400, 100, 480)));
    }

    #[test]
    fn test_clamp_degenerate() {
        // Entirely right of the frame
        assert_eq!(FaceBox::new(700, 10, 800, 60).clamp(640, 480), None);
        // Zero width
        assert_eq!(FaceBox::new(50, 10, 50, 60).clamp(640, 480), None);
        // Inverted
        assert_eq!(FaceBox::new(60, 60, 10, 10).clamp(640, 480), None);
    }

    #[test]
    fn test_normalized_is_unit_length() {
        let e = Embedding::normalized(vec![3.0, 4.0, 0.0]);
        assert!((e.norm() - 1.0).abs() < 1e-6);
        assert!((e.vector[0] - 0.6).abs() < 1e-6);
        assert!((e.vector[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_stays_finite() {
        let e = Embedding::normalized(vec![0.0; 4]);
        assert!(e.vector.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_match_embedding() {
        let a = Embedding::normalized(vec![1.0, 0.0]);
        let b = Embedding::normalized(vec![0.0, 1.0]);
        let c = Embedding::normalized(vec![-1.0, 0.0]);
        assert!((match_embedding(&a, &a) - 1.0).abs() < 1e-6);
        assert!(match_embedding(&a, &b).abs() < 1e-6);
        assert!((match_embedding(&a, &c) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_match_embedding_is_not_clamped() {
        let a = Embedding::new(vec![2.0, 0.0]);
        let b = Embedding::new(vec![3.0, 0.0]);
        assert_eq!(match_embedding(&a, &b), 6.0);
        let c = Embedding::new(vec![-3.0, 0.0]);
        assert_eq!(match_embedding(&a, &c), -6.0);
    }
}
