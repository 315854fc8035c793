//! Embedding gallery: the enrolled (label, embedding) pairs and their
//! on-disk artifact.
//!
//! The artifact is a single JSON document holding two index-aligned
//! sequences, `embeddings` and `labels`, plus a format version.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current artifact format version.
pub const GALLERY_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery not found at {0}")]
    Missing(PathBuf),
    #[error("embedding dimension mismatch: gallery has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("empty embedding for {0}")]
    EmptyEmbedding(String),
    #[error("gallery was built with model {found:?}, expected {expected}")]
    ModelMismatch {
        expected: String,
        found: Option<String>,
    },
    #[error("corrupt gallery {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("unsupported gallery format version {0}")]
    UnsupportedVersion(u32),
    #[error("gallery I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("gallery serialization: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub label: String,
    pub embedding: Embedding,
}

/// Ordered collection of enrolled faces. Every embedding has the same
/// dimension; labels repeat once per enrolled photo.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

/// Serialized form of [`Gallery`].
#[derive(Debug, Serialize, Deserialize)]
struct GalleryFile {
    version: u32,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    embeddings: Vec<Vec<f32>>,
    labels: Vec<String>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    /// Embedding dimension shared by all entries, `None` while empty.
    pub fn dim(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.dim())
    }

    /// Append an entry, rejecting embeddings whose dimension differs from
    /// the entries already present.
    pub fn push(&mut self, label: impl Into<String>, embedding: Embedding) -> Result<(), GalleryError> {
        let label = label.into();
        if embedding.dim() == 0 {
            return Err(GalleryError::EmptyEmbedding(label));
        }
        if let Some(expected) = self.dim() {
            if embedding.dim() != expected {
                return Err(GalleryError::DimensionMismatch {
                    expected,
                    actual: embedding.dim(),
                });
            }
        }
        self.entries.push(GalleryEntry { label, embedding });
        Ok(())
    }

    /// Model that produced the stored embeddings, if recorded.
    pub fn model_version(&self) -> Option<&str> {
        self.entries
            .first()
            .and_then(|e| e.embedding.model_version.as_deref())
    }

    /// Check that this gallery was built by the given embedding model.
    /// An empty gallery is compatible with anything.
    pub fn ensure_compatible(&self, dim: usize, model_version: &str) -> Result<(), GalleryError> {
        if self.is_empty() {
            return Ok(());
        }
        if self.model_version() != Some(model_version) {
            return Err(GalleryError::ModelMismatch {
                expected: model_version.to_string(),
                found: self.model_version().map(str::to_string),
            });
        }
        match self.dim() {
            Some(actual) if actual != dim => Err(GalleryError::DimensionMismatch {
                expected: dim,
                actual,
            }),
            _ => Ok(()),
        }
    }

    /// Number of entries per label, in label order.
    pub fn label_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.label.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Write the artifact atomically (temporary sibling file, then rename).
    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        let file = GalleryFile {
            version: GALLERY_FORMAT_VERSION,
            model_version: self
                .entries
                .first()
                .and_then(|e| e.embedding.model_version.clone()),
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            embeddings: self.entries.iter().map(|e| e.embedding.values.clone()).collect(),
            labels: self.entries.iter().map(|e| e.label.clone()).collect(),
        };
        let data = serde_json::to_vec(&file)?;

        let io_err = |source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;

        tracing::info!(path = %path.display(), entries = self.len(), "gallery saved");
        Ok(())
    }

    /// Load and validate a gallery artifact.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GalleryError::Missing(path.to_path_buf()));
            }
            Err(source) => {
                return Err(GalleryError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let file: GalleryFile = serde_json::from_slice(&data).map_err(|e| GalleryError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if file.version != GALLERY_FORMAT_VERSION {
            return Err(GalleryError::UnsupportedVersion(file.version));
        }
        if file.embeddings.len() != file.labels.len() {
            return Err(GalleryError::Corrupt {
                path: path.to_path_buf(),
                reason: format!(
                    "{} embeddings but {} labels",
                    file.embeddings.len(),
                    file.labels.len()
                ),
            });
        }

        let mut gallery = Gallery::new();
        for (values, label) in file.embeddings.into_iter().zip(file.labels) {
            let embedding = Embedding {
                values,
                model_version: file.model_version.clone(),
            };
            gallery.push(label, embedding)?;
        }

        tracing::info!(
            path = %path.display(),
            entries = gallery.len(),
            model = file.model_version.as_deref().unwrap_or("unknown"),
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Remove a previous artifact, if any.
    pub fn remove(path: &Path) -> Result<(), GalleryError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(GalleryError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}
