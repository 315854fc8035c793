//! One-shot audio greetings per identity.
//!
//! Each label moves `NotGreeted → Greeted` at most once per session; the
//! transition needs a `<label>_greeting` clip in the [`AudioIndex`].

use crate::types::UNKNOWN_LABEL;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Greeting clips keyed by file stem (e.g. `alice_greeting`).
#[derive(Debug, Clone, Default)]
pub struct AudioIndex {
    clips: BTreeMap<String, PathBuf>,
}

impl AudioIndex {
    /// Index the audio files directly under `dir` whose extension is in
    /// `extensions` (case-insensitive, without the dot). When several files
    /// share a stem, the first in name order wins.
    pub fn from_dir(dir: &Path, extensions: &[String]) -> std::io::Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut clips = BTreeMap::new();
        for path in paths {
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            clips.entry(stem.to_string()).or_insert(path);
        }

        tracing::info!(dir = %dir.display(), clips = clips.len(), "audio index built");
        Ok(Self { clips })
    }

    pub fn from_clips(clips: impl IntoIterator<Item = (String, PathBuf)>) -> Self {
        Self {
            clips: clips.into_iter().collect(),
        }
    }

    /// Clip for `<label>_greeting`, if one exists.
    pub fn greeting_for(&self, label: &str) -> Option<&Path> {
        self.clips
            .get(&format!("{label}_greeting"))
            .map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

/// A greeting that just fired and should be played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub label: String,
    pub clip: PathBuf,
}

/// Tracks which labels have been greeted this session.
#[derive(Debug, Default)]
pub struct Greeter {
    audio: AudioIndex,
    greeted: HashSet<String>,
}

impl Greeter {
    pub fn new(audio: AudioIndex) -> Self {
        Self {
            audio,
            greeted: HashSet::new(),
        }
    }

    /// Fire greetings for labels seen this tick that have not been greeted
    /// yet. Each returned greeting has already been marked as greeted.
    pub fn evaluate<'a>(&mut self, labels: impl IntoIterator<Item = &'a str>) -> Vec<Greeting> {
        let mut fired = Vec::new();
        for label in labels {
            if label == UNKNOWN_LABEL || self.greeted.contains(label) {
                continue;
            }
            let Some(clip) = self.audio.greeting_for(label) else {
                continue;
            };
            self.greeted.insert(label.to_string());
            tracing::info!(label, clip = %clip.display(), "greeting");
            fired.push(Greeting {
                label: label.to_string(),
                clip: clip.to_path_buf(),
            });
        }
        fired
    }

    pub fn is_greeted(&self, label: &str) -> bool {
        self.greeted.contains(label)
    }

    pub fn greeted(&self) -> &HashSet<String> {
        &self.greeted
    }
}

/// Blocking audio playback, called only from greeting worker threads.
pub trait AudioPlayer: Send + Sync {
    fn play(&self, clip: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Something that accepts greetings without blocking the caller.
pub trait GreetingSink {
    fn dispatch(&self, greeting: Greeting);
}

/// Plays each greeting on its own short-lived named thread.
///
/// Nothing waits on the worker; playback errors are logged there.
pub struct ThreadedPlayback {
    player: Arc<dyn AudioPlayer>,
}

impl ThreadedPlayback {
    pub fn new(player: Arc<dyn AudioPlayer>) -> Self {
        Self { player }
    }
}

impl GreetingSink for ThreadedPlayback {
    fn dispatch(&self, greeting: Greeting) {
        let player = Arc::clone(&self.player);
        let label = greeting.label.clone();
        let spawned = std::thread::Builder::new()
            .name("hearth-greeting".into())
            .spawn(move || {
                if let Err(err) = player.play(&greeting.clip) {
                    tracing::warn!(
                        label = %greeting.label,
                        clip = %greeting.clip.display(),
                        error = %err,
                        "could not play greeting"
                    );
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(label = %label, error = %err, "failed to spawn greeting thread");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn index(labels: &[&str]) -> AudioIndex {
        AudioIndex::from_clips(
            labels
                .iter()
                .map(|l| (format!("{l}_greeting"), PathBuf::from(format!("/audio/{l}_greeting.wav")))),
        )
    }

    #[test]
    fn test_fires_once_across_cycles() {
        let mut greeter = Greeter::new(index(&["alice"]));
        let mut dispatched = 0;
        for cycle in 0..10 {
            let fired = greeter.evaluate(["alice"]);
            if cycle == 0 {
                assert!(greeter.is_greeted("alice"));
            }
            dispatched += fired.len();
        }
        assert_eq!(dispatched, 1);
        assert_eq!(greeter.greeted().len(), 1);
    }

    #[test]
    fn test_no_clip_never_fires() {
        let mut greeter = Greeter::new(index(&["alice"]));
        for _ in 0..10 {
            assert!(greeter.evaluate(["bob"]).is_empty());
        }
        assert!(!greeter.is_greeted("bob"));
    }

    #[test]
    fn test_unknown_is_never_greeted() {
        let mut greeter = Greeter::new(index(&[UNKNOWN_LABEL]));
        assert!(greeter.evaluate([UNKNOWN_LABEL]).is_empty());
    }

    #[test]
    fn test_duplicate_label_in_one_cycle_fires_once() {
        let mut greeter = Greeter::new(index(&["alice", "bob"]));
        let fired = greeter.evaluate(["alice", "Unknown", "alice", "bob"]);
        let labels: Vec<&str> = fired.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["alice", "bob"]);
        assert_eq!(fired[0].clip, PathBuf::from("/audio/alice_greeting.wav"));
    }

    #[test]
    fn test_audio_index_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "alice_greeting.MP3",
            "alice_greeting.wav",
            "bob_greeting.ogg",
            "carol_greeting.txt",
            "notes",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("dave_greeting.wav")).unwrap();

        let exts: Vec<String> = ["wav", "mp3", "ogg"].iter().map(|s| s.to_string()).collect();
        let index = AudioIndex::from_dir(dir.path(), &exts).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.greeting_for("alice"),
            Some(dir.path().join("alice_greeting.MP3").as_path())
        );
        assert!(index.greeting_for("bob").is_some());
        assert!(index.greeting_for("carol").is_none());
        assert!(index.greeting_for("dave").is_none());
    }

    struct Recording(mpsc::Sender<PathBuf>);

    impl AudioPlayer for Recording {
        fn play(&self, clip: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.0.send(clip.to_path_buf())?;
            Err("speaker unplugged".into())
        }
    }

    #[test]
    fn test_threaded_playback_runs_off_thread_and_swallows_errors() {
        let (tx, rx) = mpsc::channel();
        let sink = ThreadedPlayback::new(Arc::new(Recording(tx)));
        sink.dispatch(Greeting {
            label: "alice".into(),
            clip: PathBuf::from("/audio/alice_greeting.wav"),
        });
        let played = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(played, PathBuf::from("/audio/alice_greeting.wav"));
    }
}
