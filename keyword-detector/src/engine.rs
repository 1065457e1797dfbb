//! Keyword-spotting inference capability.
//!
//! The detection pipeline is written once against [`KeywordEngine`]; every
//! inference backend plugs in through an adapter implementing it. The engine
//! sees plain chunks of samples and reports hits relative to the chunk it was
//! given, the detector takes care of mapping them onto stream indices.

use crate::audio_format::{AudioFormat, AudioSample};
use crate::vad::{SegmentBoundary, VadConfig, VoiceActivityDetector};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Model resource unavailable: {0}")]
    ModelNotFound(String),

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Inference failed: {0}")]
    Failure(String),
}

/// One keyword reported by an engine.
///
/// Offsets count samples from the first sample of the chunk passed to
/// [`KeywordEngine::process`]; a negative begin offset means the keyword
/// started in an earlier chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDetection {
    pub keyword: String,
    pub begin_offset: i64,
    pub end_offset: i64,
    pub metadata: Option<Vec<u8>>,
}

/// Inference capability driven by a keyword detector
#[cfg_attr(test, mockall::automock)]
pub trait KeywordEngine: Send {
    /// Audio format the engine consumes
    fn required_format(&self) -> AudioFormat {
        AudioFormat::reference()
    }

    /// Feed the next chunk of consecutive samples
    fn process(&mut self, chunk: &[AudioSample]) -> Result<Vec<EngineDetection>, EngineError>;
}

/// Configuration for [`VadKeywordEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadEngineConfig {
    /// Keyword reported for every detected utterance
    pub keyword: String,

    /// Model resource handed to the engine
    pub model_path: PathBuf,

    /// Shortest utterance, in samples, reported as a keyword
    pub min_keyword_samples: usize,

    /// Voice activity thresholds
    pub vad: VadConfig,
}

impl Default for VadEngineConfig {
    fn default() -> Self {
        Self {
            keyword: "aether".to_string(),
            model_path: PathBuf::from("models/aether.model"),
            min_keyword_samples: 4_800, // 300ms at 16kHz
            vad: VadConfig::default(),
        }
    }
}

/// Engine that reports each confirmed voice-activity segment as one
/// utterance of its keyword.
///
/// It is the bundled reference backend: deterministic, dependency-free and
/// accurate to one VAD frame, which makes it suitable for replaying prepared
/// recordings through the pipeline.
pub struct VadKeywordEngine {
    keyword: String,
    min_keyword_samples: usize,
    vad: VoiceActivityDetector,
    /// Samples received but not yet analysed as a full frame
    pending: VecDeque<AudioSample>,
    frame: Vec<AudioSample>,
    /// Samples received since the engine was opened
    received: i64,
    /// Position of the next frame to analyse
    framed: i64,
    /// Start of the segment currently in progress
    segment_start: Option<i64>,
}

impl VadKeywordEngine {
    /// Open the engine against the model resource at `config.model_path`.
    ///
    /// The resource is only checked for readability, its contents are not
    /// interpreted.
    pub fn open(config: &VadEngineConfig) -> Result<Self, EngineError> {
        check_model(&config.model_path)?;

        if config.keyword.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "keyword must not be empty".to_string(),
            ));
        }
        config
            .vad
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        info!(
            "Opened VAD keyword engine: keyword={:?}, model={}",
            config.keyword,
            config.model_path.display()
        );

        Ok(Self {
            keyword: config.keyword.clone(),
            min_keyword_samples: config.min_keyword_samples,
            frame: Vec::with_capacity(config.vad.frame_size),
            vad: VoiceActivityDetector::with_config(config.vad.clone()),
            pending: VecDeque::new(),
            received: 0,
            framed: 0,
            segment_start: None,
        })
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }
}

fn check_model(path: &Path) -> Result<(), EngineError> {
    File::open(path)
        .map(|_| ())
        .map_err(|e| EngineError::ModelNotFound(format!("{}: {}", path.display(), e)))
}

impl KeywordEngine for VadKeywordEngine {
    fn process(&mut self, chunk: &[AudioSample]) -> Result<Vec<EngineDetection>, EngineError> {
        let chunk_origin = self.received;
        self.received += chunk.len() as i64;
        self.pending.extend(chunk.iter().copied());

        let frame_size = self.vad.config().frame_size;
        let mut detections = Vec::new();

        while self.pending.len() >= frame_size {
            self.frame.clear();
            self.frame.extend(self.pending.drain(..frame_size));
            let frame_start = self.framed;
            self.framed += frame_size as i64;

            let decision = self
                .vad
                .process_frame(&self.frame)
                .map_err(|e| EngineError::Failure(e.to_string()))?;

            match decision.boundary {
                Some(SegmentBoundary::SpeechStarted { frames_back }) => {
                    let start = frame_start - (frames_back * frame_size) as i64;
                    debug!("Utterance started at engine sample {}", start);
                    self.segment_start = Some(start);
                }
                Some(SegmentBoundary::SpeechEnded { frames_back }) => {
                    let end = frame_start - (frames_back * frame_size) as i64;
                    if let Some(start) = self.segment_start.take() {
                        let length = (end - start).max(0) as usize;
                        if length >= self.min_keyword_samples {
                            debug!("Utterance [{}, {}) reported as {:?}", start, end, self.keyword);
                            detections.push(EngineDetection {
                                keyword: self.keyword.clone(),
                                begin_offset: start - chunk_origin,
                                end_offset: end - chunk_origin,
                                metadata: None,
                            });
                        } else {
                            debug!("Utterance of {} samples too short, ignored", length);
                        }
                    }
                }
                None => {}
            }
        }

        Ok(detections)
    }
}
