//! hearth-hw — Hardware collaborators for the live loop.
//!
//! V4L2 camera capture, a native preview window, and audio playback for
//! greeting clips.

pub mod audio;
pub mod camera;
pub mod display;
pub mod frame;

pub use audio::{AudioError, Speaker};
pub use camera::{Camera, CameraError, PixelFormat};
pub use display::{DisplayError, PreviewWindow};
pub use frame::{Frame, FrameError};
