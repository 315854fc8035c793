//! Nearest-neighbour matching of a probe embedding against the gallery.

use crate::gallery::Gallery;
use crate::types::{Embedding, UNKNOWN_LABEL};

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched label, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// Confidence in percent, `0.0..=100.0`.
    pub confidence: f32,
    /// Distance to the nearest entry, `None` for an empty gallery.
    pub distance: Option<f32>,
    /// Index of the nearest gallery entry.
    pub index: Option<usize>,
}

impl MatchResult {
    pub fn unknown(distance: Option<f32>, index: Option<usize>) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            confidence: 0.0,
            distance,
            index,
        }
    }

    pub fn is_known(&self) -> bool {
        self.label != UNKNOWN_LABEL
    }
}

/// Strategy for comparing a probe embedding against the gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult;
}

/// Euclidean nearest neighbour with a distance tolerance.
///
/// The closest entry wins (first index on ties). Within tolerance the
/// confidence falls linearly from 100% at distance 0 to 0% at the tolerance.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult {
        if let Some(dim) = gallery.dim().filter(|&d| d != probe.dim()) {
            tracing::debug!(gallery = dim, probe = probe.dim(), "embedding dimension mismatch");
            return MatchResult::unknown(None, None);
        }

        let mut best: Option<(usize, f32)> = None;
        for (i, entry) in gallery.entries().iter().enumerate() {
            let distance = probe.euclidean_distance(&entry.embedding);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) if distance <= tolerance => MatchResult {
                label: gallery.entries()[idx].label.clone(),
                confidence: confidence(distance, tolerance),
                distance: Some(distance),
                index: Some(idx),
            },
            Some((idx, distance)) => MatchResult::unknown(Some(distance), Some(idx)),
            None => MatchResult::unknown(None, None),
        }
    }
}

/// `max(0, (1 - distance / tolerance) * 100)`.
pub fn confidence(distance: f32, tolerance: f32) -> f32 {
    if tolerance <= 0.0 {
        return if distance <= 0.0 { 100.0 } else { 0.0 };
    }
    ((1.0 - distance / tolerance) * 100.0).max(0.0)
}
