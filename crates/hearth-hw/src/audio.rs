//! Audio clip playback via `rodio`.

use rodio::{Decoder, OutputStream, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no audio output device: {0}")]
    Output(#[from] rodio::StreamError),
    #[error("failed to create playback sink: {0}")]
    Sink(#[from] rodio::PlayError),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: rodio::decoder::DecoderError,
    },
}

/// Plays clips on the default output device.
///
/// The output stream is opened per clip so the player itself can be shared
/// across threads; each call blocks until the clip finishes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Speaker;

impl Speaker {
    pub fn new() -> Self {
        Self
    }

    pub fn play(&self, clip: &Path) -> Result<(), AudioError> {
        let file = File::open(clip).map_err(|source| AudioError::Open {
            path: clip.to_path_buf(),
            source,
        })?;
        let source = Decoder::new(BufReader::new(file)).map_err(|source| AudioError::Decode {
            path: clip.to_path_buf(),
            source,
        })?;

        let (_stream, handle) = OutputStream::try_default()?;
        let sink = Sink::try_new(&handle)?;
        sink.append(source);
        tracing::debug!(clip = %clip.display(), "playing clip");
        sink.sleep_until_end();
        Ok(())
    }
}
