//! Sample loading and readiness.

use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fundsp::{math::db_amp, wave::Wave};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Handle to a sample: a path or URL.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleRef(String);

impl SampleRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_remote(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    /// Local path of the sample, resolved against `root` when relative.
    fn local_path(&self, root: &Path) -> PathBuf {
        let path = Path::new(self.0.strip_prefix("file://").unwrap_or(&self.0));
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        }
    }

    /// Whether the reference names a supported file type.
    pub fn has_loadable_extension(&self) -> bool {
        can_load_path(Path::new(&self.0))
    }

    /// Display name, usually the file stem.
    pub fn name(&self) -> &str {
        self.0.rsplit(['/', '\\']).next()
            .and_then(|s| s.split('.').next())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.0)
    }
}

/// Supported file extensions for loading.
pub const FILE_EXTENSIONS: [&str; 11] =
    ["aac", "aiff", "caf", "flac", "m4a", "mkv", "mp3", "mp4", "ogg", "wav", "webm"];

/// Check whether a path has a loadable file extension.
fn can_load_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| {
        let ext = ext.to_ascii_lowercase();
        FILE_EXTENSIONS.iter().any(|x| *x == ext)
    })
}

/// Produces the encoded bytes of a sample.
pub trait SampleFetcher: Send + Sync {
    fn fetch(&self, sample: &SampleRef) -> Result<Vec<u8>, Box<dyn Error>>;
}

/// Reads samples from disk. Relative references resolve against `root`.
pub struct FileFetcher {
    pub root: PathBuf,
}

impl SampleFetcher for FileFetcher {
    fn fetch(&self, sample: &SampleRef) -> Result<Vec<u8>, Box<dyn Error>> {
        if sample.is_remote() {
            return Err(format!("remote samples are not supported: {}", sample.as_str()).into())
        }
        let path = sample.local_path(&self.root);
        if !can_load_path(&path) {
            return Err(format!("unsupported file type: {}", path.display()).into())
        }
        Ok(fs::read(path)?)
    }
}

pub enum SampleState {
    Loading,
    Ready(Arc<Wave>),
    Failed(String),
}

/// Outcome of a finished load.
#[derive(Debug, PartialEq)]
pub enum LoadEvent {
    Loaded(SampleRef),
    Failed(SampleRef, String),
}

/// Used to communicate between loader threads and the engine.
struct LoadUpdate {
    sample: SampleRef,
    result: Result<Wave, String>,
}

/// Decoded samples keyed by reference. Loads run on background threads.
pub struct SampleBank {
    states: HashMap<SampleRef, SampleState>,
    fetcher: Arc<dyn SampleFetcher>,
    tx: Sender<LoadUpdate>,
    rx: Receiver<LoadUpdate>,
}

impl SampleBank {
    pub fn new(fetcher: Arc<dyn SampleFetcher>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            states: HashMap::new(),
            fetcher,
            tx,
            rx,
        }
    }

    /// Start loading a sample, unless it is loaded or already loading.
    /// Failed samples are retried.
    pub fn request(&mut self, sample: &SampleRef) {
        if matches!(self.states.get(sample), Some(SampleState::Loading | SampleState::Ready(_))) {
            return
        }

        debug!(sample = sample.as_str(), "loading sample");
        self.states.insert(sample.clone(), SampleState::Loading);
        let fetcher = self.fetcher.clone();
        let tx = self.tx.clone();
        let sample = sample.clone();

        thread::spawn(move || {
            let result = fetcher.fetch(&sample)
                .and_then(decode)
                .map_err(|e| e.to_string());
            if let Err(e) = tx.send(LoadUpdate { sample, result }) {
                warn!("{e}");
            }
        });
    }

    /// Insert an already decoded sample.
    pub fn insert(&mut self, sample: SampleRef, wave: Wave) {
        self.states.insert(sample, SampleState::Ready(Arc::new(wave)));
    }

    pub fn state(&self, sample: &SampleRef) -> Option<&SampleState> {
        self.states.get(sample)
    }

    /// Returns the wave if it has finished decoding.
    pub fn get(&self, sample: &SampleRef) -> Option<Arc<Wave>> {
        match self.states.get(sample) {
            Some(SampleState::Ready(wave)) => Some(wave.clone()),
            _ => None,
        }
    }

    pub fn is_ready(&self, sample: &SampleRef) -> bool {
        self.get(sample).is_some()
    }

    /// Number of loads in flight.
    pub fn pending(&self) -> usize {
        self.states.values().filter(|s| matches!(s, SampleState::Loading)).count()
    }

    /// Collect finished loads without blocking.
    pub fn poll(&mut self) -> Vec<LoadEvent> {
        let mut events = Vec::new();
        while let Ok(update) = self.rx.try_recv() {
            events.push(self.finish(update));
        }
        events
    }

    /// Block until every pending load finishes or `timeout` elapses.
    pub fn wait_pending(&mut self, timeout: Duration) -> Vec<LoadEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.poll();

        while self.pending() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(update) => events.push(self.finish(update)),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(pending = self.pending(), "timed out waiting for samples");
                    break
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        events
    }

    fn finish(&mut self, update: LoadUpdate) -> LoadEvent {
        match update.result {
            Ok(wave) => {
                debug!(sample = update.sample.as_str(), frames = wave.len(), "sample ready");
                self.states.insert(update.sample.clone(), SampleState::Ready(Arc::new(wave)));
                LoadEvent::Loaded(update.sample)
            }
            Err(e) => {
                warn!(sample = update.sample.as_str(), "sample failed to load: {e}");
                self.states.insert(update.sample.clone(), SampleState::Failed(e.clone()));
                LoadEvent::Failed(update.sample, e)
            }
        }
    }
}

/// Decode and normalize an audio file.
fn decode(data: Vec<u8>) -> Result<Wave, Box<dyn Error>> {
    let mut wave = Wave::load_slice(data)?;
    wave.normalize();
    trim_wave(&mut wave);
    Ok(wave)
}

/// Trim leading and trailing silence from the wave.
/// Returns the total count of samples trimmed.
fn trim_wave(wave: &mut Wave) -> usize {
    // anything below -80 dB is inaudible at any sane monitoring level
    let threshold = db_amp(-80.0);
    let mut start = 0;
    let mut end = wave.len();
    let len = end;

    while start < end && wave.at(0, start).abs() < threshold {
        start += 1;
    }

    while end > start && wave.at(0, end - 1).abs() < threshold {
        end -= 1;
    }

    if end - start < len {
        wave.retain(start as isize, end - start);
    }

    start + len - end
}
