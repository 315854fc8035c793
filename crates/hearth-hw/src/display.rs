//! Preview window via `minifb`.

use image::RgbImage;
use minifb::{Key, Window, WindowOptions};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("failed to open preview window: {0}")]
    Open(String),
    #[error("failed to update preview window: {0}")]
    Update(String),
}

/// Native window showing annotated frames. The window is opened on the
/// first frame, sized to it; pressing Q or Escape, or closing the window,
/// requests quit.
pub struct PreviewWindow {
    title: String,
    window: Option<Window>,
    buffer: Vec<u32>,
    closed: bool,
}

impl PreviewWindow {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            window: None,
            buffer: Vec::new(),
            closed: false,
        }
    }

    pub fn present(&mut self, frame: &RgbImage) -> Result<(), DisplayError> {
        let (width, height) = frame.dimensions();
        if self.window.is_none() {
            let window = Window::new(
                &self.title,
                width as usize,
                height as usize,
                WindowOptions::default(),
            )
            .map_err(|e| DisplayError::Open(e.to_string()))?;
            tracing::info!(width, height, "preview window opened");
            self.window = Some(window);
        }

        pack_0rgb(frame, &mut self.buffer);
        match &mut self.window {
            Some(window) => window
                .update_with_buffer(&self.buffer, width as usize, height as usize)
                .map_err(|e| DisplayError::Update(e.to_string())),
            None => Ok(()),
        }
    }

    pub fn quit_requested(&self) -> bool {
        if self.closed {
            return true;
        }
        match &self.window {
            Some(w) => !w.is_open() || w.is_key_down(Key::Q) || w.is_key_down(Key::Escape),
            None => false,
        }
    }

    pub fn close(&mut self) {
        if self.window.take().is_some() {
            tracing::info!("preview window closed");
        }
        self.closed = true;
    }
}

/// Pack RGB pixels into minifb's `0RGB` u32 layout, reusing `out`.
fn pack_0rgb(frame: &RgbImage, out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        frame
            .pixels()
            .map(|p| (u32::from(p[0]) << 16) | (u32::from(p[1]) << 8) | u32::from(p[2])),
    );
}
