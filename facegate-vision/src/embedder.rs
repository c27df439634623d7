use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};
use std::path::Path;

use crate::face::{Embedding, FaceEmbedder};

/// FaceNet / MobileFaceNet style embedder taking a standardized NHWC RGB input.
pub struct OnnxFaceEmbedder {
    session: Session,
    input_width: u32,
    input_height: u32,
}

impl OnnxFaceEmbedder {
    pub fn load(path: &Path, input_width: u32, input_height: u32) -> Result<Self> {
        Ok(Self {
            session: crate::model::load_session(path)?,
            input_width,
            input_height,
        })
    }
}

impl FaceEmbedder for OnnxFaceEmbedder {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding> {
        let input = preprocess(face, self.input_width, self.input_height)?;
        let input_tensor = Value::from_array(input)?;

        let outputs = self.session.run(ort::inputs![input_tensor])?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("reading embedder output")?;

        // Expecting shape [1, D]
        let embedding_size = if shape.len() == 2 {
            shape[1] as usize
        } else {
            data.len()
        };
        if embedding_size == 0 || embedding_size > data.len() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            anyhow::bail!("unexpected embedder output shape {:?}", dims);
        }

        Ok(Embedding::normalized(data[..embedding_size].to_vec()))
    }
}

/// Resize to the model input and standardize per image: (x - mean) / (std + 1e-6).
///
/// Output layout is [1, H, W, 3] in RGB order.
pub fn preprocess(face: &RgbImage, width: u32, height: u32) -> Result<Array4<f32>> {
    if face.width() == 0 || face.height() == 0 {
        anyhow::bail!("empty face crop");
    }
    let resized = image::imageops::resize(face, width, height, FilterType::Triangle);

    let values: Vec<f32> = resized.as_raw().iter().map(|&v| v as f32).collect();
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let std = variance.sqrt();

    let standardized = values.into_iter().map(|v| (v - mean) / (std + 1e-6)).collect();

    Ok(Array4::from_shape_vec(
        (1, height as usize, width as usize, 3),
        standardized,
    )?)
}
