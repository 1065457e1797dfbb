//! Keyword detector library
//!
//! Provides a shared single-writer/multi-reader audio stream, and a keyword
//! detection pipeline that reads from it on a background thread and
//! broadcasts sample-indexed detections to observers.

pub mod audio_format;
pub mod config;
pub mod detector;
pub mod engine;
pub mod notifier;
pub mod observer;
pub mod stream;
pub mod vad;

// Re-export main types
pub use audio_format::{AudioFormat, AudioSample, Encoding, Endianness, SAMPLE_RATE};
pub use config::{ConfigError, ServiceConfig};
pub use detector::{DetectorConfig, DetectorError, DetectorStats, KeywordDetector};
pub use engine::{EngineDetection, EngineError, KeywordEngine, VadEngineConfig, VadKeywordEngine};
pub use notifier::{KeywordNotifier, Notifier, StateNotifier};
pub use observer::{DetectionEvent, DetectorState, DetectorStateObserver, KeywordObserver};
pub use stream::{Index, Reader, ReaderPolicy, Stream, StreamError, Writer, WriterPolicy};
pub use vad::{VadConfig, VadError, VadState, VoiceActivityDetector};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
