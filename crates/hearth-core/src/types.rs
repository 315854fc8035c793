use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;

/// Label reported for faces that match no gallery entry within tolerance.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Face bounding box in integer pixel coordinates of the image it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// `(bottom - top) * (right - left)`, zero for degenerate boxes.
    pub fn area(&self) -> u64 {
        self.height() as u64 * self.width() as u64
    }

    /// Map a box found on a downscaled image back onto the full-size frame.
    ///
    /// Coordinates are divided by `scale` and truncated toward zero.
    pub fn rescale(&self, scale: f32) -> Self {
        let up = |v: u32| (v as f32 / scale) as u32;
        Self {
            top: up(self.top),
            right: up(self.right),
            bottom: up(self.bottom),
            left: up(self.left),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings. Embeddings of
    /// different dimension are infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.dim() != other.dim() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One matched face of a detection cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub bbox: BoundingBox,
    pub label: String,
    /// Match confidence in percent, `0.0..=100.0`.
    pub confidence: f32,
}

/// Locates faces in an RGB image.
pub trait FaceDetect {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Computes one embedding per requested face box.
///
/// The output is index-aligned with `boxes`; `None` marks a box for which
/// extraction produced no embedding.
pub trait FaceEmbed {
    fn embed(
        &mut self,
        image: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Option<Embedding>>, RecognizerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(top: u32, right: u32, bottom: u32, left: u32) -> BoundingBox {
        BoundingBox { top, right, bottom, left }
    }

    #[test]
    fn test_area() {
        assert_eq!(bbox(10, 50, 40, 20).area(), 30 * 30);
        // Degenerate boxes never underflow.
        assert_eq!(bbox(40, 20, 10, 50).area(), 0);
    }

    #[test]
    fn test_rescale_truncates() {
        let b = bbox(10, 21, 30, 5).rescale(0.25);
        assert_eq!(b, bbox(40, 84, 120, 20));

        let b = bbox(1, 1, 1, 1).rescale(0.3);
        // 1 / 0.3 = 3.33.. → 3
        assert_eq!(b.top, 3);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let short = Embedding::new(vec![0.5]);
        let long = Embedding::new(vec![0.5, 9.0, -9.0]);
        assert_eq!(short.euclidean_distance(&long), f32::INFINITY);
        assert_eq!(long.euclidean_distance(&short), f32::INFINITY);
    }
}
