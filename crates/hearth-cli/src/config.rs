use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Runtime configuration: defaults, then an optional TOML file, then
/// `HEARTH_*` environment variables, then command-line overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Enrollment library root, one subdirectory per person.
    pub faces_dir: PathBuf,
    /// Where enrollment writes face crops for review.
    pub crops_dir: PathBuf,
    /// Persisted gallery artifact.
    pub gallery_path: PathBuf,
    /// Longest side enrollment images are shrunk to before detection.
    pub max_image_dim: u32,
    /// Directory holding `<label>_greeting.<ext>` clips.
    pub audio_dir: PathBuf,
    /// Recognized audio extensions, without the dot.
    pub audio_extensions: Vec<String>,
    /// Run detection on every Nth frame.
    pub sampling_interval: u32,
    /// Downscale factor applied to live frames before detection.
    pub frame_scale: f32,
    /// Maximum embedding distance accepted as a match.
    pub tolerance: f32,
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// TTF/OTF font for overlay captions; boxes only when unset.
    pub font_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            faces_dir: PathBuf::from("faces"),
            crops_dir: PathBuf::from("training_faces"),
            gallery_path: PathBuf::from("gallery.json"),
            max_image_dim: 1600,
            audio_dir: PathBuf::from("audio"),
            audio_extensions: vec!["wav".into(), "mp3".into(), "ogg".into()],
            sampling_interval: 1,
            frame_scale: 0.25,
            tolerance: 1.0,
            camera_device: "/dev/video0".to_string(),
            model_dir: PathBuf::from("models"),
            font_path: None,
        }
    }
}

impl Config {
    /// Defaults, overlaid by `file` when given, then by the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Overlay `HEARTH_*` variables looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = &lookup;
        if let Some(v) = lookup("HEARTH_FACES_DIR") {
            self.faces_dir = v.into();
        }
        if let Some(v) = lookup("HEARTH_CROPS_DIR") {
            self.crops_dir = v.into();
        }
        if let Some(v) = lookup("HEARTH_GALLERY_PATH") {
            self.gallery_path = v.into();
        }
        if let Some(v) = lookup("HEARTH_AUDIO_DIR") {
            self.audio_dir = v.into();
        }
        if let Some(v) = lookup("HEARTH_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("HEARTH_MODEL_DIR") {
            self.model_dir = v.into();
        }
        if let Some(v) = lookup("HEARTH_FONT_PATH") {
            self.font_path = (!v.is_empty()).then(|| v.into());
        }
        self.max_image_dim = env_parse(lookup, "HEARTH_MAX_IMAGE_DIM", self.max_image_dim);
        self.sampling_interval =
            env_parse(lookup, "HEARTH_SAMPLING_INTERVAL", self.sampling_interval);
        self.frame_scale = env_parse(lookup, "HEARTH_FRAME_SCALE", self.frame_scale);
        self.tolerance = env_parse(lookup, "HEARTH_TOLERANCE", self.tolerance);
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0) {
            bail!("tolerance must be positive, got {}", self.tolerance);
        }
        if self.sampling_interval == 0 {
            bail!("sampling interval must be at least 1");
        }
        if !(self.frame_scale > 0.0 && self.frame_scale <= 1.0) {
            bail!("frame scale must be in (0, 1], got {}", self.frame_scale);
        }
        if self.max_image_dim == 0 {
            bail!("max image dimension must be at least 1");
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(hearth_core::DETECTOR_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(hearth_core::RECOGNIZER_MODEL_FILE)
    }
}

fn env_parse<T: FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    current: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            current
        }),
        None => current,
    }
}
