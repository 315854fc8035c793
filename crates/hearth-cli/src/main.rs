use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hearth_core::detector::FaceDetector;
use hearth_core::enroll::{self, EnrollError, Enroller};
use hearth_core::recognizer::{FaceRecognizer, ARCFACE_EMBEDDING_DIM, ARCFACE_MODEL_VERSION};
use hearth_core::render::Renderer;
use hearth_core::session::{Collaborators, Session, SessionConfig, SessionSummary};
use hearth_core::{AudioIndex, Gallery, GalleryError, ThreadedPlayback};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod devices;

use config::Config;
use devices::{CameraSource, SpeakerPlayer, Window};

#[derive(Parser)]
#[command(name = "hearth", about = "Greet household members by face")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the face gallery from the labeled photo library
    Enroll,
    /// Recognize faces on the live camera feed and greet known people
    Run {
        /// Maximum embedding distance accepted as a match
        #[arg(long)]
        tolerance: Option<f32>,
        /// Run detection on every Nth frame
        #[arg(long)]
        interval: Option<u32>,
        /// Downscale factor applied to frames before detection
        #[arg(long)]
        scale: Option<f32>,
        /// V4L2 device path (e.g. /dev/video0)
        #[arg(long)]
        camera: Option<String>,
    },
    /// List enrolled labels and their embedding counts
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll => {
            config.validate()?;
            tokio::task::spawn_blocking(move || enroll_library(&config))
                .await
                .context("enrollment task panicked")??;
        }
        Commands::Run {
            tolerance,
            interval,
            scale,
            camera,
        } => {
            if let Some(t) = tolerance {
                config.tolerance = t;
            }
            if let Some(n) = interval {
                config.sampling_interval = n;
            }
            if let Some(s) = scale {
                config.frame_scale = s;
            }
            if let Some(device) = camera {
                config.camera_device = device;
            }
            config.validate()?;
            run_live(config).await?;
        }
        Commands::List => list_gallery(&config)?,
    }

    Ok(())
}

fn enroll_library(config: &Config) -> Result<()> {
    let library = enroll::scan_library(&config.faces_dir)
        .with_context(|| format!("failed to scan {}", config.faces_dir.display()))?;
    tracing::info!(
        labels = library.len(),
        images = library.values().map(Vec::len).sum::<usize>(),
        "photo library scanned"
    );

    let mut detector = FaceDetector::load(&config.detector_model_path())
        .context("failed to load face detector")?;
    let mut recognizer = FaceRecognizer::load(&config.recognizer_model_path())
        .context("failed to load face recognizer")?;

    // Enrollment is never incremental; a stale gallery must not survive a
    // failed run.
    Gallery::remove(&config.gallery_path).context("failed to remove previous gallery")?;

    let report = match Enroller::new(
        &mut detector,
        &mut recognizer,
        config.crops_dir.clone(),
        config.max_image_dim,
    )
    .enroll(&library)
    {
        Ok(report) => report,
        Err(EnrollError::EmptyGallery { images }) => {
            bail!("no faces could be encoded from {images} image(s); nothing saved")
        }
        Err(e) => return Err(e).context("enrollment failed"),
    };

    for label in &report.labels {
        println!("{}: {}/{} images encoded", label.label, label.valid, label.total);
    }
    report
        .gallery
        .save(&config.gallery_path)
        .context("failed to save gallery")?;
    println!(
        "Saved {} embeddings ({} of {} images) to {}",
        report.gallery.len(),
        report.valid_images(),
        report.total_images(),
        config.gallery_path.display()
    );
    Ok(())
}

async fn run_live(config: Config) -> Result<()> {
    let gallery = load_gallery(&config.gallery_path)?;
    gallery
        .ensure_compatible(ARCFACE_EMBEDDING_DIM, ARCFACE_MODEL_VERSION)
        .with_context(|| {
            format!(
                "gallery {} does not match the recognizer; run `hearth enroll` again",
                config.gallery_path.display()
            )
        })?;
    tracing::info!(entries = gallery.len(), "gallery loaded");

    let audio = match AudioIndex::from_dir(&config.audio_dir, &config.audio_extensions) {
        Ok(index) => index,
        Err(e) => {
            tracing::warn!(
                dir = %config.audio_dir.display(),
                error = %e,
                "audio directory unavailable, greetings disabled"
            );
            AudioIndex::default()
        }
    };

    let detector = FaceDetector::load(&config.detector_model_path())
        .context("failed to load face detector")?;
    let recognizer = FaceRecognizer::load(&config.recognizer_model_path())
        .context("failed to load face recognizer")?;
    let renderer = Renderer::new(load_font(config.font_path.as_deref()));

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let session_config = SessionConfig {
        sampling_interval: config.sampling_interval,
        frame_scale: config.frame_scale,
        tolerance: config.tolerance,
    };
    let summary = tokio::task::spawn_blocking(move || -> Result<SessionSummary> {
        let mut detector = detector;
        let mut recognizer = recognizer;
        let mut source = CameraSource(
            hearth_hw::Camera::open(&config.camera_device).context("failed to open camera")?,
        );
        let mut preview = Window(hearth_hw::PreviewWindow::new("hearth"));
        let greetings = ThreadedPlayback::new(Arc::new(SpeakerPlayer(hearth_hw::Speaker::new())));

        let mut session = Session::new(session_config, gallery, audio, renderer);
        let mut io = Collaborators {
            source: &mut source,
            detector: &mut detector,
            embedder: &mut recognizer,
            preview: &mut preview,
            greetings: &greetings,
        };
        Ok(session.run(&mut io, &stop)?)
    })
    .await
    .context("recognition task panicked")??;

    println!(
        "Stopped ({:?}) after {} frames, {} detection cycles, {} greetings",
        summary.stop, summary.frames, summary.detection_cycles, summary.greetings
    );
    Ok(())
}

fn list_gallery(config: &Config) -> Result<()> {
    let gallery = load_gallery(&config.gallery_path)?;
    for (label, count) in gallery.label_counts() {
        println!("{label}\t{count}");
    }
    println!("{} embeddings in {}", gallery.len(), config.gallery_path.display());
    Ok(())
}

fn load_gallery(path: &Path) -> Result<Gallery> {
    match Gallery::load(path) {
        Ok(gallery) => Ok(gallery),
        Err(GalleryError::Missing(path)) => {
            bail!("no gallery at {}; run `hearth enroll` first", path.display())
        }
        Err(e) => Err(e).context("failed to load gallery"),
    }
}

fn load_font(path: Option<&Path>) -> Option<ab_glyph::FontVec> {
    let path = path?;
    let font = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| ab_glyph::FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
    match font {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(font = %path.display(), error = %e, "cannot load font, captions disabled");
            None
        }
    }
}
