//! Bridges between the hardware crate and the session's capability traits.

use hearth_core::session::{FrameSource, Preview};
use hearth_core::AudioPlayer;
use hearth_hw::{Camera, CameraError, DisplayError, PreviewWindow, Speaker};
use image::RgbImage;
use std::path::Path;

pub struct CameraSource(pub Camera);

impl FrameSource for CameraSource {
    type Error = CameraError;

    fn next_frame(&mut self) -> Result<Option<RgbImage>, CameraError> {
        match self.0.capture_image() {
            Ok(image) => Ok(Some(image)),
            Err(CameraError::Released) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn release(&mut self) {
        self.0.release();
    }
}

pub struct Window(pub PreviewWindow);

impl Preview for Window {
    type Error = DisplayError;

    fn present(&mut self, frame: &RgbImage) -> Result<(), DisplayError> {
        self.0.present(frame)
    }

    fn quit_requested(&self) -> bool {
        self.0.quit_requested()
    }

    fn close(&mut self) {
        self.0.close();
    }
}

pub struct SpeakerPlayer(pub Speaker);

impl AudioPlayer for SpeakerPlayer {
    fn play(&self, clip: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.0.play(clip)?)
    }
}
