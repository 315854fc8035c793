//! Enrollment: turns a directory of labeled photos into a gallery.
//!
//! Each photo is processed on its own: a photo that cannot be loaded, holds
//! no face, or yields no embedding is logged and skipped. Only an empty
//! final gallery fails the run.

use crate::detector::DetectorError;
use crate::gallery::{Gallery, GalleryError};
use crate::imaging;
use crate::recognizer::RecognizerError;
use crate::types::{BoundingBox, FaceDetect, FaceEmbed};
use image::imageops;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a single photo contributed nothing to the gallery.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("cannot load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("no face found")]
    NoFaceDetected,
    #[error("no embedding produced for the selected face")]
    NoEmbeddingProduced,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("cannot save crop {path}: {source}")]
    Crop {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Run-level enrollment failures.
#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot prepare crop directory {path}: {source}")]
    CropDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no usable faces in {images} image(s); gallery not written")]
    EmptyGallery { images: usize },
    #[error(transparent)]
    Gallery(#[from] GalleryError),
}

/// Per-label accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSummary {
    pub label: String,
    pub valid: usize,
    pub total: usize,
}

/// Outcome of an enrollment run.
#[derive(Debug)]
pub struct EnrollmentReport {
    pub gallery: Gallery,
    pub labels: Vec<LabelSummary>,
}

impl EnrollmentReport {
    pub fn total_images(&self) -> usize {
        self.labels.iter().map(|l| l.total).sum()
    }

    pub fn valid_images(&self) -> usize {
        self.labels.iter().map(|l| l.valid).sum()
    }
}

/// List `faces_dir/<label>/<image>`: one entry per subdirectory, holding its
/// regular files. Labels and files come out in name order.
pub fn scan_library(faces_dir: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>, EnrollError> {
    let mut library = BTreeMap::new();
    for entry in std::fs::read_dir(faces_dir).map_err(scan_error(faces_dir))? {
        let person_dir = entry.map_err(scan_error(faces_dir))?.path();
        if !person_dir.is_dir() {
            continue;
        }
        let Some(label) = person_dir.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %person_dir.display(), "skipping non-UTF-8 directory name");
            continue;
        };

        let mut images: Vec<PathBuf> = std::fs::read_dir(&person_dir)
            .map_err(scan_error(&person_dir))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        images.sort();
        library.insert(label.to_string(), images);
    }
    Ok(library)
}

fn scan_error(path: &Path) -> impl FnOnce(std::io::Error) -> EnrollError {
    let path = path.to_path_buf();
    move |source| EnrollError::Scan { path, source }
}

/// Index of the largest box by area; the earliest box wins ties.
pub fn select_largest_face(boxes: &[BoundingBox]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (i, bbox) in boxes.iter().enumerate() {
        let area = bbox.area();
        if best.map_or(true, |(_, a)| area > a) {
            best = Some((i, area));
        }
    }
    best.map(|(i, _)| i)
}

/// Drives detection and embedding over a photo library.
pub struct Enroller<'a, D, E> {
    detector: &'a mut D,
    embedder: &'a mut E,
    crops_dir: PathBuf,
    max_image_dim: u32,
}

impl<'a, D: FaceDetect, E: FaceEmbed> Enroller<'a, D, E> {
    pub fn new(detector: &'a mut D, embedder: &'a mut E, crops_dir: impl Into<PathBuf>, max_image_dim: u32) -> Self {
        Self {
            detector,
            embedder,
            crops_dir: crops_dir.into(),
            max_image_dim,
        }
    }

    /// Enroll every label's photos into a fresh gallery.
    ///
    /// The crop directory is wiped first; enrollment is never incremental.
    pub fn enroll(
        &mut self,
        images_by_label: &BTreeMap<String, Vec<PathBuf>>,
    ) -> Result<EnrollmentReport, EnrollError> {
        self.reset_crops_dir()?;

        let mut gallery = Gallery::new();
        let mut labels = Vec::with_capacity(images_by_label.len());

        for (label, images) in images_by_label {
            let person_crops = self.crops_dir.join(format!("{label}_cropped"));
            std::fs::create_dir_all(&person_crops).map_err(|source| EnrollError::CropDir {
                path: person_crops.clone(),
                source,
            })?;

            let mut valid = 0usize;
            for path in images {
                match self.enroll_image(&mut gallery, label, path, &person_crops, valid + 1) {
                    Ok(()) => {
                        valid += 1;
                        tracing::info!(label = %label, image = %path.display(), "encoded");
                    }
                    Err(err) => {
                        tracing::warn!(label = %label, image = %path.display(), error = %err, "skipping image");
                    }
                }
            }

            tracing::info!(label = %label, valid, total = images.len(), "label enrolled");
            labels.push(LabelSummary {
                label: label.clone(),
                valid,
                total: images.len(),
            });
        }

        let report = EnrollmentReport { gallery, labels };
        if report.gallery.is_empty() {
            return Err(EnrollError::EmptyGallery {
                images: report.total_images(),
            });
        }
        Ok(report)
    }

    fn reset_crops_dir(&self) -> Result<(), EnrollError> {
        let crop_err = |source: std::io::Error| EnrollError::CropDir {
            path: self.crops_dir.clone(),
            source,
        };
        match std::fs::remove_dir_all(&self.crops_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(crop_err(e)),
        }
        std::fs::create_dir_all(&self.crops_dir).map_err(crop_err)
    }

    /// Process one photo. `ordinal` is the 1-based number this photo gets
    /// among the label's valid photos if it succeeds.
    fn enroll_image(
        &mut self,
        gallery: &mut Gallery,
        label: &str,
        path: &Path,
        crops_dir: &Path,
        ordinal: usize,
    ) -> Result<(), ImageError> {
        let image = imaging::downscale(imaging::load_rgb(path)?, self.max_image_dim);

        let boxes = self.detector.detect(&image)?;
        let selected = select_largest_face(&boxes).ok_or(ImageError::NoFaceDetected)?;
        let face = boxes[selected];
        if boxes.len() > 1 {
            tracing::debug!(faces = boxes.len(), ?face, "several faces, keeping the largest");
        }

        let embedding = self
            .embedder
            .embed(&image, std::slice::from_ref(&face))?
            .into_iter()
            .next()
            .flatten()
            .ok_or(ImageError::NoEmbeddingProduced)?;

        let crop_path = crops_dir.join(format!("{label}_{ordinal}.jpg"));
        imageops::crop_imm(&image, face.left, face.top, face.width(), face.height())
            .to_image()
            .save(&crop_path)
            .map_err(|source| ImageError::Crop {
                path: crop_path.clone(),
                source,
            })?;

        gallery.push(label, embedding)?;
        Ok(())
    }
}
