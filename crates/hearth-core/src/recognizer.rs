//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional face embeddings from a square crop around each
//! detected box, using the w600k_r50 ArcFace model.

use crate::types::{BoundingBox, Embedding, FaceEmbed};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric: (x - 127.5) / 127.5
pub const ARCFACE_EMBEDDING_DIM: usize = 512;
pub const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (download from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box {0:?} lies outside the {1}x{2} image")]
    EmptyCrop(BoundingBox, u32, u32),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract an L2-normalized embedding for one face box.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let (width, height) = image.dimensions();
        let crop = square_crop(face, width, height)
            .ok_or(RecognizerError::EmptyCrop(*face, width, height))?;

        let patch = imageops::crop_imm(image, crop.left, crop.top, crop.width(), crop.height())
            .to_image();
        let patch = imageops::resize(&patch, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle);
        let input = preprocess(&patch);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

impl FaceEmbed for FaceRecognizer {
    fn embed(
        &mut self,
        image: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Option<Embedding>>, RecognizerError> {
        let mut out = Vec::with_capacity(boxes.len());
        for face in boxes {
            match self.extract(image, face) {
                Ok(embedding) => out.push(Some(embedding)),
                Err(RecognizerError::Ort(e)) => return Err(RecognizerError::Ort(e)),
                Err(e) => {
                    tracing::debug!(error = %e, bbox = ?face, "no embedding for face");
                    out.push(None);
                }
            }
        }
        Ok(out)
    }
}

/// Square region centred on the box, side = the longer box edge, clamped to
/// the image. `None` when the clamped region is empty.
fn square_crop(face: &BoundingBox, width: u32, height: u32) -> Option<BoundingBox> {
    let side = face.width().max(face.height()) as i64;
    let cx = (face.left as i64 + face.right as i64) / 2;
    let cy = (face.top as i64 + face.bottom as i64) / 2;

    let left = (cx - side / 2).clamp(0, width as i64) as u32;
    let top = (cy - side / 2).clamp(0, height as i64) as u32;
    let right = (cx - side / 2 + side).clamp(0, width as i64) as u32;
    let bottom = (cy - side / 2 + side).clamp(0, height as i64) as u32;

    let crop = BoundingBox { top, right, bottom, left };
    (crop.area() > 0).then_some(crop)
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

/// Convert a 112×112 RGB crop into a normalized NCHW tensor.
fn preprocess(face: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape_and_channels() {
        let face = RgbImage::from_fn(ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, |_, _| {
            image::Rgb([0, 128, 255])
        });
        let tensor = preprocess(&face);
        let size = ARCFACE_INPUT_SIZE as usize;
        assert_eq!(tensor.shape(), &[1, 3, size, size]);
        assert!((tensor[[0, 0, 5, 5]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] - (0.5 / 127.5)).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_square_crop_centres_on_box() {
        let face = BoundingBox { top: 40, right: 80, bottom: 100, left: 60 };
        let crop = square_crop(&face, 200, 200).unwrap();
        // 20x60 box → 60x60 square around centre (70, 70).
        assert_eq!(crop, BoundingBox { top: 40, right: 100, bottom: 100, left: 40 });
    }

    #[test]
    fn test_square_crop_clamps_at_edges() {
        let face = BoundingBox { top: 0, right: 10, bottom: 30, left: 0 };
        let crop = square_crop(&face, 50, 50).unwrap();
        assert_eq!(crop.left, 0);
        assert_eq!(crop.top, 0);
        assert!(crop.right <= 50 && crop.bottom <= 50);

        let degenerate = BoundingBox { top: 10, right: 10, bottom: 10, left: 10 };
        assert!(square_crop(&degenerate, 50, 50).is_none());
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
