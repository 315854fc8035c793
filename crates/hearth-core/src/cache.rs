//! Last detection-cycle results, reused on ticks where detection is skipped.

use crate::types::{BoundingBox, DetectionResult};

/// Results of the most recent detection cycle.
///
/// A cycle that finds faces replaces the contents wholesale; a cycle that
/// finds none clears them. Skipped ticks leave the cache alone.
#[derive(Debug, Clone, Default)]
pub struct FrameCache {
    results: Vec<DetectionResult>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one detection cycle's output.
    pub fn update(&mut self, results: Vec<DetectionResult>) {
        if results.is_empty() {
            if !self.results.is_empty() {
                tracing::debug!(previous = self.results.len(), "no faces this cycle, cache cleared");
            }
            self.results.clear();
        } else {
            self.results = results;
        }
    }

    pub fn results(&self) -> &[DetectionResult] {
        &self.results
    }

    pub fn boxes(&self) -> impl Iterator<Item = &BoundingBox> + '_ {
        self.results.iter().map(|r| &r.bbox)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.results.iter().map(|r| r.label.as_str())
    }

    pub fn confidences(&self) -> impl Iterator<Item = f32> + '_ {
        self.results.iter().map(|r| r.confidence)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
