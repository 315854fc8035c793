//! hearth-core — Face enrollment, matching, and the live greeting loop.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference.

pub mod cache;
pub mod detector;
pub mod enroll;
pub mod gallery;
pub mod greeting;
pub mod imaging;
pub mod matcher;
pub mod recognizer;
pub mod render;
pub mod session;
pub mod types;

pub use cache::FrameCache;
pub use gallery::{Gallery, GalleryError};
pub use greeting::{AudioIndex, AudioPlayer, Greeter, Greeting, GreetingSink, ThreadedPlayback};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher};
pub use session::{Session, SessionConfig, SessionError, SessionSummary};
pub use types::{BoundingBox, DetectionResult, Embedding, FaceDetect, FaceEmbed, UNKNOWN_LABEL};

/// SCRFD detector model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognizer model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
