//! Keyword detector
//!
//! Attaches a reader to a shared audio stream, feeds the audio to a
//! [`KeywordEngine`] on a dedicated thread, and broadcasts every keyword the
//! engine reports, with indices in the stream's own index space, to the
//! registered keyword observers. State changes of the processing loop are
//! broadcast to state observers.

use crate::audio_format::{AudioFormat, AudioSample};
use crate::engine::{EngineError, KeywordEngine};
use crate::notifier::{KeywordNotifier, StateNotifier};
use crate::observer::{DetectionEvent, DetectorState, DetectorStateObserver, KeywordObserver};
use crate::stream::{Index, Reader, ReaderPolicy, Stream, StreamError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Samples handed to the engine per read (10ms at 16kHz)
pub const DEFAULT_CHUNK_SIZE: usize = 160;

/// Upper bound on how long the processing thread waits for audio before
/// re-checking for shutdown
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Incompatible audio format: expected {expected}, got {actual}")]
    IncompatibleFormat {
        expected: AudioFormat,
        actual: AudioFormat,
    },

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Failed to start processing thread: {0}")]
    ThreadSpawn(#[from] io::Error),
}

/// Configuration for a keyword detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Samples read from the stream and handed to the engine at a time
    pub chunk_size: usize,

    /// How long a single read may wait before the loop re-checks for shutdown
    pub read_timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl DetectorConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.chunk_size == 0 {
            return Err(DetectorError::InvalidArgument(
                "chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.read_timeout_ms == 0 {
            return Err(DetectorError::InvalidArgument(
                "read_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Detector statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorStats {
    pub state: DetectorState,
    pub chunks_processed: u64,
    pub samples_processed: u64,
    pub keywords_detected: u64,
}

/// State shared between the detector handle and its processing thread
struct DetectorShared {
    shutdown: AtomicBool,
    state: Mutex<DetectorState>,
    chunks_processed: AtomicU64,
    samples_processed: AtomicU64,
    keywords_detected: AtomicU64,
}

/// Keyword detector running on its own thread.
///
/// Dropping the detector stops the thread; an engine call already in
/// progress is allowed to finish.
pub struct KeywordDetector {
    keyword_notifier: Arc<KeywordNotifier>,
    state_notifier: Arc<StateNotifier>,
    shared: Arc<DetectorShared>,
    worker: Option<JoinHandle<()>>,
}

impl KeywordDetector {
    /// Create a detector reading `stream` and start its processing thread.
    ///
    /// `format` describes the audio carried by `stream` and must match the
    /// engine's required format exactly. On any failure no detector exists
    /// and no reader is left attached to the stream.
    pub fn create(
        stream: Stream,
        format: &AudioFormat,
        keyword_notifier: Arc<KeywordNotifier>,
        state_notifier: Arc<StateNotifier>,
        engine: Box<dyn KeywordEngine>,
        config: DetectorConfig,
    ) -> Result<Self, DetectorError> {
        config.validate()?;
        format
            .validate()
            .map_err(|e| DetectorError::InvalidArgument(e.to_string()))?;

        let required = engine.required_format();
        if *format != required {
            warn!("Rejecting audio format {}, engine requires {}", format, required);
            return Err(DetectorError::IncompatibleFormat {
                expected: required,
                actual: *format,
            });
        }

        if format.bytes_per_frame() != std::mem::size_of::<AudioSample>() {
            return Err(DetectorError::InvalidArgument(format!(
                "engine format {} is not 16-bit mono",
                format
            )));
        }

        if stream.word_size() != format.bytes_per_frame() {
            return Err(DetectorError::InvalidArgument(format!(
                "stream word size {} does not match {}-byte audio frames",
                stream.word_size(),
                format.bytes_per_frame()
            )));
        }

        let reader = stream.create_reader(ReaderPolicy::Blocking)?;
        let attach_index = reader.tell()?;

        info!("Initializing keyword detector");
        info!("Format: {}", format);
        info!("Attached at stream index {}", attach_index);

        let shared = Arc::new(DetectorShared {
            shutdown: AtomicBool::new(false),
            state: Mutex::new(DetectorState::StreamClosed),
            chunks_processed: AtomicU64::new(0),
            samples_processed: AtomicU64::new(0),
            keywords_detected: AtomicU64::new(0),
        });

        let worker = Worker {
            stream,
            reader,
            engine,
            keyword_notifier: keyword_notifier.clone(),
            state_notifier: state_notifier.clone(),
            shared: shared.clone(),
            config,
        };

        let handle = thread::Builder::new()
            .name("keyword-detector".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            keyword_notifier,
            state_notifier,
            shared,
            worker: Some(handle),
        })
    }

    /// Create a detector with private notifiers pre-loaded with observers.
    ///
    /// The notifiers only hold weak handles, so the caller must keep its own
    /// `Arc` to every observer for as long as it should receive events.
    pub fn create_with_observers(
        stream: Stream,
        format: &AudioFormat,
        keyword_observers: &[Arc<dyn KeywordObserver>],
        state_observers: &[Arc<dyn DetectorStateObserver>],
        engine: Box<dyn KeywordEngine>,
        config: DetectorConfig,
    ) -> Result<Self, DetectorError> {
        let keyword_notifier = Arc::new(KeywordNotifier::new());
        for observer in keyword_observers {
            keyword_notifier.add_observer(observer);
        }

        let state_notifier = Arc::new(StateNotifier::new());
        for observer in state_observers {
            state_notifier.add_observer(observer);
        }

        Self::create(stream, format, keyword_notifier, state_notifier, engine, config)
    }

    pub fn add_keyword_observer(&self, observer: &Arc<dyn KeywordObserver>) {
        self.keyword_notifier.add_observer(observer);
    }

    pub fn remove_keyword_observer(&self, observer: &Arc<dyn KeywordObserver>) {
        self.keyword_notifier.remove_observer(observer);
    }

    pub fn add_state_observer(&self, observer: &Arc<dyn DetectorStateObserver>) {
        self.state_notifier.add_observer(observer);
    }

    pub fn remove_state_observer(&self, observer: &Arc<dyn DetectorStateObserver>) {
        self.state_notifier.remove_observer(observer);
    }

    /// Current state of the processing loop
    pub fn state(&self) -> DetectorState {
        *self.shared.state.lock()
    }

    /// Whether the processing thread has exited
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Get current statistics
    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            state: self.state(),
            chunks_processed: self.shared.chunks_processed.load(Ordering::Relaxed),
            samples_processed: self.shared.samples_processed.load(Ordering::Relaxed),
            keywords_detected: self.shared.keywords_detected.load(Ordering::Relaxed),
        }
    }

    /// Stop the processing thread and wait for it to exit
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);

        if let Some(handle) = self.worker.take() {
            // An observer dropping the detector from its own callback runs on
            // the processing thread, which cannot join itself.
            if handle.thread().id() == thread::current().id() {
                debug!("Shutdown requested from processing thread, detaching");
                return;
            }
            if handle.join().is_err() {
                error!("Keyword detector thread panicked");
            }
            info!("Keyword detector stopped");
        }
    }
}

impl Drop for KeywordDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Everything the processing thread owns
struct Worker {
    stream: Stream,
    reader: Reader,
    engine: Box<dyn KeywordEngine>,
    keyword_notifier: Arc<KeywordNotifier>,
    state_notifier: Arc<StateNotifier>,
    shared: Arc<DetectorShared>,
    config: DetectorConfig,
}

impl Worker {
    fn run(mut self) {
        let word_size = self.stream.word_size();
        let timeout = Duration::from_millis(self.config.read_timeout_ms);
        let mut bytes = vec![0u8; self.config.chunk_size * word_size];
        let mut samples: Vec<AudioSample> = Vec::with_capacity(self.config.chunk_size);
        let mut active = false;

        while !self.shared.shutdown.load(Ordering::Acquire) {
            let words = match self.reader.read_timeout(&mut bytes, timeout) {
                Ok(0) => {
                    info!("Stream closed and drained, keyword detector finished");
                    self.transition(DetectorState::StreamClosed);
                    return;
                }
                Ok(words) => words,
                Err(StreamError::TimedOut) => continue,
                Err(e) => {
                    error!("Keyword detector read failed: {}", e);
                    self.transition(DetectorState::Error);
                    return;
                }
            };

            if !active {
                active = true;
                self.transition(DetectorState::Active);
            }

            let chunk_start = match self.reader.tell() {
                Ok(index) => index - words as Index,
                Err(e) => {
                    error!("Keyword detector lost its reader: {}", e);
                    self.transition(DetectorState::Error);
                    return;
                }
            };

            samples.clear();
            samples.extend(
                bytes[..words * word_size]
                    .chunks_exact(word_size)
                    .map(|b| AudioSample::from_le_bytes([b[0], b[1]])),
            );

            let detections = match self.engine.process(&samples) {
                Ok(detections) => detections,
                Err(e) => {
                    error!("Keyword engine failed: {}", e);
                    self.transition(DetectorState::Error);
                    return;
                }
            };

            self.shared.chunks_processed.fetch_add(1, Ordering::Relaxed);
            self.shared
                .samples_processed
                .fetch_add(words as u64, Ordering::Relaxed);

            for detection in detections {
                let event = DetectionEvent::from_engine(chunk_start, detection);
                info!(
                    "Keyword {:?} detected at [{}, {}]",
                    event.keyword, event.begin_index, event.end_index
                );
                self.shared.keywords_detected.fetch_add(1, Ordering::Relaxed);

                let stream = &self.stream;
                self.keyword_notifier
                    .notify(|observer| observer.on_keyword_detected(stream, &event));
            }
        }

        debug!("Keyword detector shutdown requested");
    }

    /// Record a state change and tell state observers, unless nothing changed
    fn transition(&self, next: DetectorState) {
        {
            let mut state = self.shared.state.lock();
            if *state == next {
                return;
            }
            debug!("Detector state: {} -> {}", *state, next);
            *state = next;
        }
        self.state_notifier
            .notify(|observer| observer.on_state_changed(next));
    }
}
