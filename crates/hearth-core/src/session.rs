//! Live recognition session.
//!
//! A single thread drives capture → detect/embed/match (on sampled ticks) →
//! cache update → render → greeting → present, one frame per tick. All
//! session state (gallery, cache, greeted set, frame counter) lives on the
//! [`Session`]; it is created at startup and never reset while running.

use crate::cache::FrameCache;
use crate::detector::DetectorError;
use crate::gallery::Gallery;
use crate::greeting::{AudioIndex, Greeter, GreetingSink};
use crate::imaging;
use crate::matcher::{EuclideanMatcher, MatchResult, Matcher};
use crate::recognizer::RecognizerError;
use crate::render::{self, Renderer};
use crate::types::{DetectionResult, FaceDetect, FaceEmbed};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("preview failed: {0}")]
    Preview(BoxError),
    #[error("session already stopped")]
    Stopped,
}

/// Source of live frames. `Ok(None)` marks the end of the stream.
pub trait FrameSource {
    type Error: std::error::Error;

    fn next_frame(&mut self) -> Result<Option<RgbImage>, Self::Error>;

    /// Release the underlying device.
    fn release(&mut self) {}
}

/// On-screen preview with a quit key.
pub trait Preview {
    type Error: std::error::Error + Send + Sync + 'static;

    fn present(&mut self, frame: &RgbImage) -> Result<(), Self::Error>;

    fn quit_requested(&self) -> bool;

    /// Tear down the window.
    fn close(&mut self) {}
}

/// Everything the loop talks to outside the session itself.
pub struct Collaborators<'a, S, D, E, P> {
    pub source: &'a mut S,
    pub detector: &'a mut D,
    pub embedder: &'a mut E,
    pub preview: &'a mut P,
    pub greetings: &'a dyn GreetingSink,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Run detection on every Nth frame.
    pub sampling_interval: u32,
    /// Downscale factor applied to frames before detection.
    pub frame_scale: f32,
    /// Maximum embedding distance accepted as a match.
    pub tolerance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Quit key pressed in the preview.
    Quit,
    /// External stop flag raised (e.g. Ctrl+C).
    Interrupted,
    /// The frame source ended or failed.
    CaptureEnded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: u64,
    pub detection_cycles: u64,
    pub failed_cycles: u64,
    pub greetings: usize,
    pub stop: StopReason,
}

pub struct Session {
    config: SessionConfig,
    gallery: Gallery,
    matcher: EuclideanMatcher,
    cache: FrameCache,
    greeter: Greeter,
    renderer: Renderer,
    state: SessionState,
    frame_counter: u64,
    detection_cycles: u64,
    failed_cycles: u64,
    greetings: usize,
}

impl Session {
    pub fn new(config: SessionConfig, gallery: Gallery, audio: AudioIndex, renderer: Renderer) -> Self {
        Self {
            config,
            gallery,
            matcher: EuclideanMatcher,
            cache: FrameCache::new(),
            greeter: Greeter::new(audio),
            renderer,
            state: SessionState::Init,
            frame_counter: 0,
            detection_cycles: 0,
            failed_cycles: 0,
            greetings: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn greeter(&self) -> &Greeter {
        &self.greeter
    }

    /// Run until quit, interruption, or the end of the frame source, then
    /// release the source and the preview.
    pub fn run<S, D, E, P>(
        &mut self,
        io: &mut Collaborators<'_, S, D, E, P>,
        stop: &AtomicBool,
    ) -> Result<SessionSummary, SessionError>
    where
        S: FrameSource,
        D: FaceDetect,
        E: FaceEmbed,
        P: Preview,
    {
        if self.state == SessionState::Stopped {
            return Err(SessionError::Stopped);
        }
        self.state = SessionState::Running;
        tracing::info!(
            gallery = self.gallery.len(),
            interval = self.config.sampling_interval,
            scale = self.config.frame_scale,
            tolerance = self.config.tolerance,
            "session running"
        );

        let outcome = loop {
            if stop.load(Ordering::Relaxed) {
                break Ok(StopReason::Interrupted);
            }
            match self.tick(io) {
                Ok(Some(reason)) => break Ok(reason),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
        };

        self.state = SessionState::Stopped;
        io.source.release();
        io.preview.close();

        let stop = outcome?;
        let summary = SessionSummary {
            frames: self.frame_counter,
            detection_cycles: self.detection_cycles,
            failed_cycles: self.failed_cycles,
            greetings: self.greetings,
            stop,
        };
        tracing::info!(?summary, "session stopped");
        Ok(summary)
    }

    /// One loop iteration. Returns why the session should stop, if it should.
    pub fn tick<S, D, E, P>(
        &mut self,
        io: &mut Collaborators<'_, S, D, E, P>,
    ) -> Result<Option<StopReason>, SessionError>
    where
        S: FrameSource,
        D: FaceDetect,
        E: FaceEmbed,
        P: Preview,
    {
        let mut frame = match io.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("frame source ended");
                return Ok(Some(StopReason::CaptureEnded));
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame capture failed");
                return Ok(Some(StopReason::CaptureEnded));
            }
        };

        self.frame_counter += 1;
        if self.frame_counter % u64::from(self.config.sampling_interval.max(1)) == 0 {
            self.detection_cycles += 1;
            match self.detection_cycle(&frame, &mut *io.detector, &mut *io.embedder) {
                Ok(results) => self.cache.update(results),
                Err(e) => {
                    self.failed_cycles += 1;
                    tracing::warn!(frame = self.frame_counter, error = %e, "detection cycle failed");
                }
            }
        }

        let overlays = render::overlays(self.cache.results(), self.config.frame_scale);
        self.renderer.draw(&mut frame, &overlays);

        for greeting in self.greeter.evaluate(self.cache.labels()) {
            self.greetings += 1;
            io.greetings.dispatch(greeting);
        }

        io.preview
            .present(&frame)
            .map_err(|e| SessionError::Preview(Box::new(e)))?;
        if io.preview.quit_requested() {
            tracing::info!("quit requested");
            return Ok(Some(StopReason::Quit));
        }
        Ok(None)
    }

    fn detection_cycle<D: FaceDetect, E: FaceEmbed>(
        &self,
        frame: &RgbImage,
        detector: &mut D,
        embedder: &mut E,
    ) -> Result<Vec<DetectionResult>, SessionError> {
        let small = imaging::scale(frame, self.config.frame_scale);
        let boxes = detector.detect(&small)?;
        if boxes.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = embedder.embed(&small, &boxes)?;
        let results = boxes
            .into_iter()
            .zip(embeddings.into_iter().chain(std::iter::repeat(None)))
            .map(|(bbox, embedding)| {
                let matched = match embedding {
                    Some(e) => self.matcher.compare(&e, &self.gallery, self.config.tolerance),
                    None => MatchResult::unknown(None, None),
                };
                tracing::debug!(
                    label = %matched.label,
                    confidence = matched.confidence,
                    distance = ?matched.distance,
                    "face matched"
                );
                DetectionResult {
                    bbox,
                    label: matched.label,
                    confidence: matched.confidence,
                }
            })
            .collect();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::greeting::Greeting;
    use crate::types::{BoundingBox, Embedding, UNKNOWN_LABEL};
    use image::Rgb;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    #[derive(Debug, thiserror::Error)]
    #[error("camera unplugged")]
    struct Unplugged;

    struct FakeCamera {
        frames: VecDeque<Result<RgbImage, Unplugged>>,
        released: bool,
    }

    impl FakeCamera {
        fn blank(n: usize) -> Self {
            Self {
                frames: (0..n).map(|_| Ok(RgbImage::new(64, 64))).collect(),
                released: false,
            }
        }
    }

    impl FrameSource for FakeCamera {
        type Error = Unplugged;

        fn next_frame(&mut self) -> Result<Option<RgbImage>, Unplugged> {
            self.frames.pop_front().transpose()
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    /// Replays one scripted result per call, then reports no faces.
    #[derive(Default)]
    struct ScriptedDetector {
        script: VecDeque<Result<Vec<BoundingBox>, DetectorError>>,
        calls: usize,
        last_size: Option<(u32, u32)>,
    }

    impl FaceDetect for ScriptedDetector {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            self.calls += 1;
            self.last_size = Some(image.dimensions());
            self.script.pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    /// Embeds each box as [left]; left == 99 yields nothing.
    struct LeftEmbedder;

    impl FaceEmbed for LeftEmbedder {
        fn embed(
            &mut self,
            _image: &RgbImage,
            boxes: &[BoundingBox],
        ) -> Result<Vec<Option<Embedding>>, RecognizerError> {
            Ok(boxes
                .iter()
                .map(|b| (b.left != 99).then(|| Embedding::new(vec![b.left as f32])))
                .collect())
        }
    }

    #[derive(Default)]
    struct FakePreview {
        presented: Vec<RgbImage>,
        quit_after: Option<usize>,
        closed: bool,
    }

    impl Preview for FakePreview {
        type Error = Unplugged;

        fn present(&mut self, frame: &RgbImage) -> Result<(), Unplugged> {
            self.presented.push(frame.clone());
            Ok(())
        }

        fn quit_requested(&self) -> bool {
            self.quit_after.is_some_and(|n| self.presented.len() >= n)
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[derive(Default)]
    struct RecordingSink(RefCell<Vec<Greeting>>);

    impl GreetingSink for RecordingSink {
        fn dispatch(&self, greeting: Greeting) {
            self.0.borrow_mut().push(greeting);
        }
    }

    fn face_at(left: u32) -> BoundingBox {
        BoundingBox { top: 4, right: left + 8, bottom: 12, left }
    }

    fn session(interval: u32, scale: f32, greet: &[&str]) -> Session {
        let mut gallery = Gallery::new();
        gallery.push("alice", Embedding::new(vec![10.0])).unwrap();
        gallery.push("bob", Embedding::new(vec![30.0])).unwrap();
        let audio = AudioIndex::from_clips(
            greet
                .iter()
                .map(|l| (format!("{l}_greeting"), PathBuf::from(format!("{l}.wav")))),
        );
        Session::new(
            SessionConfig {
                sampling_interval: interval,
                frame_scale: scale,
                tolerance: 2.0,
            },
            gallery,
            audio,
            Renderer::new(None),
        )
    }

    struct Rig {
        camera: FakeCamera,
        detector: ScriptedDetector,
        preview: FakePreview,
        sink: RecordingSink,
    }

    impl Rig {
        fn new(frames: usize, script: Vec<Result<Vec<BoundingBox>, DetectorError>>) -> Self {
            Self {
                camera: FakeCamera::blank(frames),
                detector: ScriptedDetector {
                    script: script.into(),
                    ..Default::default()
                },
                preview: FakePreview::default(),
                sink: RecordingSink::default(),
            }
        }

        fn run(&mut self, session: &mut Session) -> SessionSummary {
            let mut embedder = LeftEmbedder;
            let mut io = Collaborators {
                source: &mut self.camera,
                detector: &mut self.detector,
                embedder: &mut embedder,
                preview: &mut self.preview,
                greetings: &self.sink,
            };
            session.run(&mut io, &AtomicBool::new(false)).unwrap()
        }
    }

    #[test]
    fn test_runs_until_capture_ends_and_releases() {
        let mut s = session(1, 1.0, &[]);
        let mut rig = Rig::new(3, vec![]);
        let summary = rig.run(&mut s);

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.stop, StopReason::CaptureEnded);
        assert_eq!(s.state(), SessionState::Stopped);
        assert_eq!(rig.preview.presented.len(), 3);
        assert!(rig.camera.released);
        assert!(rig.preview.closed);
    }

    #[test]
    fn test_capture_error_stops_session() {
        let mut s = session(1, 1.0, &[]);
        let mut rig = Rig::new(0, vec![]);
        rig.camera.frames = VecDeque::from([Ok(RgbImage::new(8, 8)), Err(Unplugged)]);
        let summary = rig.run(&mut s);
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.stop, StopReason::CaptureEnded);
    }

    #[test]
    fn test_detection_only_on_sampled_frames() {
        let mut s = session(3, 1.0, &[]);
        let mut rig = Rig::new(10, vec![]);
        let summary = rig.run(&mut s);
        assert_eq!(rig.detector.calls, 3);
        assert_eq!(summary.detection_cycles, 3);
        assert_eq!(summary.frames, 10);
    }

    #[test]
    fn test_matches_unknowns_and_missing_embeddings() {
        let mut s = session(1, 1.0, &[]);
        let mut rig = Rig::new(1, vec![Ok(vec![face_at(11), face_at(50), face_at(99)])]);
        rig.run(&mut s);

        let labels: Vec<&str> = s.cache().labels().collect();
        assert_eq!(labels, vec!["alice", UNKNOWN_LABEL, UNKNOWN_LABEL]);
        let confidences: Vec<f32> = s.cache().confidences().collect();
        assert!((confidences[0] - 50.0).abs() < 1e-4);
        assert_eq!(&confidences[1..], &[0.0, 0.0]);
    }

    #[test]
    fn test_cache_reused_on_skipped_ticks_and_cleared_on_empty_cycle() {
        let mut s = session(2, 1.0, &[]);
        let mut rig = Rig::new(0, vec![Ok(vec![face_at(30)]), Ok(vec![])]);
        let mut embedder = LeftEmbedder;
        rig.camera = FakeCamera::blank(4);
        let mut io = Collaborators {
            source: &mut rig.camera,
            detector: &mut rig.detector,
            embedder: &mut embedder,
            preview: &mut rig.preview,
            greetings: &rig.sink,
        };

        s.tick(&mut io).unwrap(); // frame 1: skipped
        assert!(s.cache().is_empty());
        s.tick(&mut io).unwrap(); // frame 2: bob found
        assert_eq!(s.cache().labels().collect::<Vec<_>>(), vec!["bob"]);
        s.tick(&mut io).unwrap(); // frame 3: skipped, cache kept
        assert_eq!(s.cache().len(), 1);
        s.tick(&mut io).unwrap(); // frame 4: no faces, cache cleared
        assert!(s.cache().is_empty());
    }

    #[test]
    fn test_failed_cycle_keeps_cache_and_loop_alive() {
        let mut s = session(1, 1.0, &[]);
        let mut rig = Rig::new(
            3,
            vec![
                Ok(vec![face_at(10)]),
                Err(DetectorError::InferenceFailed("bad frame".into())),
                Ok(vec![face_at(10)]),
            ],
        );
        let summary = rig.run(&mut s);
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.failed_cycles, 1);
        assert_eq!(s.cache().labels().collect::<Vec<_>>(), vec!["alice"]);
    }

    #[test]
    fn test_greets_once_per_label() {
        let mut s = session(1, 1.0, &["alice"]);
        let script = (0..10).map(|_| Ok(vec![face_at(10), face_at(30)])).collect();
        let mut rig = Rig::new(10, script);
        let summary = rig.run(&mut s);

        let dispatched = rig.sink.0.borrow();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].label, "alice");
        assert_eq!(summary.greetings, 1);
        assert!(s.greeter().is_greeted("alice"));
        // No clip for bob.
        assert!(!s.greeter().is_greeted("bob"));
    }

    #[test]
    fn test_quit_key_and_stop_flag() {
        let mut s = session(1, 1.0, &[]);
        let mut rig = Rig::new(10, vec![]);
        rig.preview.quit_after = Some(2);
        let summary = rig.run(&mut s);
        assert_eq!(summary.stop, StopReason::Quit);
        assert_eq!(summary.frames, 2);

        let mut s = session(1, 1.0, &[]);
        let mut rig = Rig::new(10, vec![]);
        let mut embedder = LeftEmbedder;
        let mut io = Collaborators {
            source: &mut rig.camera,
            detector: &mut rig.detector,
            embedder: &mut embedder,
            preview: &mut rig.preview,
            greetings: &rig.sink,
        };
        let summary = s.run(&mut io, &AtomicBool::new(true)).unwrap();
        assert_eq!(summary.stop, StopReason::Interrupted);
        assert_eq!(summary.frames, 0);
        assert!(matches!(s.run(&mut io, &AtomicBool::new(false)), Err(SessionError::Stopped)));
    }

    #[test]
    fn test_detects_on_downscaled_frame_and_draws_full_size() {
        let mut s = session(1, 0.5, &[]);
        let mut rig = Rig::new(1, vec![Ok(vec![face_at(10)])]);
        rig.run(&mut s);

        assert_eq!(rig.detector.last_size, Some((32, 32)));
        let shown = &rig.preview.presented[0];
        assert_eq!(shown.dimensions(), (64, 64));
        // Box (4, 18, 12, 10) at half scale → (8, 36, 24, 20) on the frame.
        assert_eq!(*shown.get_pixel(20, 8), Rgb([0, 255, 0]));
        assert_eq!(*shown.get_pixel(35, 23), Rgb([0, 255, 0]));
    }
}
