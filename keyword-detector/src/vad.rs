//! Voice Activity Detection (VAD) module
//!
//! Detects speech vs silence using energy and zero-crossing rate analysis,
//! and reports where confirmed speech segments start and end so callers can
//! map them back onto sample positions.

use crate::audio_format::AudioSample;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VadError {
    #[error("Insufficient audio data: need at least {0} samples")]
    InsufficientData(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// VAD configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Energy threshold for speech detection (0.0 - 1.0)
    pub energy_threshold: f32,

    /// Zero-crossing rate threshold for speech detection
    pub zcr_threshold: f32,

    /// Frame size in samples for analysis
    pub frame_size: usize,

    /// Number of consecutive frames needed to confirm speech
    pub speech_frames_required: usize,

    /// Number of consecutive silence frames to end speech
    pub silence_frames_required: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,        // 2% of max energy
            zcr_threshold: 0.15,           // 15% zero crossings
            frame_size: 480,               // 30ms at 16kHz
            speech_frames_required: 3,     // 90ms of speech to trigger
            silence_frames_required: 10,   // 300ms of silence to end
        }
    }
}

impl VadConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), VadError> {
        if !(0.0..=1.0).contains(&self.energy_threshold) {
            return Err(VadError::InvalidConfig(
                "energy_threshold must be between 0.0 and 1.0".to_string()
            ));
        }

        if !(0.0..=1.0).contains(&self.zcr_threshold) {
            return Err(VadError::InvalidConfig(
                "zcr_threshold must be between 0.0 and 1.0".to_string()
            ));
        }

        if self.frame_size == 0 {
            return Err(VadError::InvalidConfig(
                "frame_size must be greater than 0".to_string()
            ));
        }

        if self.speech_frames_required == 0 || self.silence_frames_required == 0 {
            return Err(VadError::InvalidConfig(
                "speech and silence frame counts must be greater than 0".to_string()
            ));
        }

        Ok(())
    }
}

/// Voice Activity Detector state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// Currently detecting silence
    Silence,

    /// Potential speech detected (waiting for confirmation)
    MaybeSpeech,

    /// Active speech confirmed
    Speech,

    /// Speech ending (waiting for confirmation)
    MaybeSilence,
}

/// Edge of a confirmed speech segment.
///
/// `frames_back` counts whole frames between the start of the frame that
/// confirmed the edge and the frame where the edge actually lies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentBoundary {
    SpeechStarted { frames_back: usize },
    SpeechEnded { frames_back: usize },
}

/// Outcome of analysing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDecision {
    /// Whether speech is active after this frame
    pub speech_active: bool,

    /// Set when this frame confirmed the start or end of a segment
    pub boundary: Option<SegmentBoundary>,
}

/// Voice Activity Detector
pub struct VoiceActivityDetector {
    config: VadConfig,
    state: VadState,
    speech_frame_count: usize,
    silence_frame_count: usize,
}

impl VoiceActivityDetector {
    /// Create a new VAD with default configuration
    pub fn new() -> Self {
        Self::with_config(VadConfig::default())
    }

    /// Create a new VAD with custom configuration
    pub fn with_config(config: VadConfig) -> Self {
        debug!("Initializing VAD with config: {:?}", config);

        Self {
            config,
            state: VadState::Silence,
            speech_frame_count: 0,
            silence_frame_count: 0,
        }
    }

    /// Process one audio frame
    pub fn process_frame(&mut self, samples: &[AudioSample]) -> Result<FrameDecision, VadError> {
        if samples.len() < self.config.frame_size {
            return Err(VadError::InsufficientData(self.config.frame_size));
        }

        let frame = &samples[..self.config.frame_size];
        let energy = self.calculate_energy(frame);
        let zcr = self.calculate_zero_crossing_rate(frame);

        trace!(
            "Frame analysis: energy={:.4}, zcr={:.4}, state={:?}",
            energy, zcr, self.state
        );

        let is_speech_frame = energy > self.config.energy_threshold
                           && zcr > self.config.zcr_threshold;

        let boundary = self.update_state(is_speech_frame);

        Ok(FrameDecision {
            speech_active: self.is_speech_active(),
            boundary,
        })
    }

    /// Calculate normalized RMS energy of audio frame
    fn calculate_energy(&self, samples: &[AudioSample]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f64 = samples
            .iter()
            .map(|&s| {
                let normalized = s as f64 / i16::MAX as f64;
                normalized * normalized
            })
            .sum();

        let rms = (sum_squares / samples.len() as f64).sqrt();
        rms as f32
    }

    /// Calculate zero-crossing rate (ZCR)
    ///
    /// ZCR measures how often the signal crosses the zero amplitude line.
    /// Voiced audio has moderate ZCR, silence has very low ZCR.
    fn calculate_zero_crossing_rate(&self, samples: &[AudioSample]) -> f32 {
        if samples.len() < 2 {
            return 0.0;
        }

        let crossings = samples
            .windows(2)
            .filter(|pair| {
                (pair[0] >= 0 && pair[1] < 0) || (pair[0] < 0 && pair[1] >= 0)
            })
            .count();

        crossings as f32 / (samples.len() - 1) as f32
    }

    /// Advance the state machine, reporting a confirmed segment edge
    fn update_state(&mut self, is_speech_frame: bool) -> Option<SegmentBoundary> {
        match self.state {
            VadState::Silence => {
                if is_speech_frame {
                    self.speech_frame_count = 1;
                    self.silence_frame_count = 0;
                    self.state = VadState::MaybeSpeech;
                    debug!("State: Silence -> MaybeSpeech");
                    return self.confirm_speech();
                }
            }

            VadState::MaybeSpeech => {
                if is_speech_frame {
                    self.speech_frame_count += 1;
                    return self.confirm_speech();
                } else {
                    self.state = VadState::Silence;
                    self.speech_frame_count = 0;
                    debug!("State: MaybeSpeech -> Silence (false alarm)");
                }
            }

            VadState::Speech => {
                if !is_speech_frame {
                    self.silence_frame_count = 1;
                    self.speech_frame_count = 0;
                    self.state = VadState::MaybeSilence;
                    debug!("State: Speech -> MaybeSilence");
                    return self.confirm_silence();
                } else {
                    self.silence_frame_count = 0;
                }
            }

            VadState::MaybeSilence => {
                if !is_speech_frame {
                    self.silence_frame_count += 1;
                    return self.confirm_silence();
                } else {
                    self.state = VadState::Speech;
                    self.silence_frame_count = 0;
                    debug!("State: MaybeSilence -> Speech (continued)");
                }
            }
        }

        None
    }

    fn confirm_speech(&mut self) -> Option<SegmentBoundary> {
        if self.speech_frame_count < self.config.speech_frames_required {
            return None;
        }
        self.state = VadState::Speech;
        debug!("State: MaybeSpeech -> Speech (confirmed)");
        Some(SegmentBoundary::SpeechStarted {
            frames_back: self.speech_frame_count - 1,
        })
    }

    fn confirm_silence(&mut self) -> Option<SegmentBoundary> {
        if self.silence_frame_count < self.config.silence_frames_required {
            return None;
        }
        self.state = VadState::Silence;
        debug!("State: MaybeSilence -> Silence (speech ended)");
        Some(SegmentBoundary::SpeechEnded {
            frames_back: self.silence_frame_count - 1,
        })
    }

    /// Check if speech is currently active
    pub fn is_speech_active(&self) -> bool {
        matches!(self.state, VadState::Speech | VadState::MaybeSilence)
    }

    /// Get current VAD state
    pub fn state(&self) -> VadState {
        self.state
    }

    /// Reset VAD to initial state
    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.speech_frame_count = 0;
        self.silence_frame_count = 0;
        debug!("VAD reset to initial state");
    }

    /// Get current configuration
    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}

impl Default for VoiceActivityDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn generate_silence(length: usize) -> Vec<AudioSample> {
        vec![0; length]
    }

    fn generate_tone(frequency: f32, duration_samples: usize, amplitude: f32) -> Vec<AudioSample> {
        let sample_rate = 16000.0;
        (0..duration_samples)
            .map(|i| {
                let t = i as f32 / sample_rate;
                let sample = amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin();
                (sample * i16::MAX as f32) as i16
            })
            .collect()
    }

    #[test]
    fn test_vad_config_default() {
        let config = VadConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_size, 480);
    }

    #[test]
    fn test_vad_config_validation() {
        let mut config = VadConfig::default();
        config.energy_threshold = 1.5;
        assert!(config.validate().is_err());

        config.energy_threshold = 0.5;
        config.frame_size = 0;
        assert!(config.validate().is_err());

        config.frame_size = 480;
        config.silence_frames_required = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_vad_config_partial_json() {
        let config: VadConfig = serde_json::from_str(r#"{"frame_size": 160}"#).unwrap();
        assert_eq!(config.frame_size, 160);
        assert_eq!(config.speech_frames_required, 3);
    }

    #[test]
    fn test_silence_detection() {
        let mut vad = VoiceActivityDetector::new();
        let silence = generate_silence(480);

        let decision = vad.process_frame(&silence).unwrap();
        assert!(!decision.speech_active);
        assert_eq!(decision.boundary, None);
        assert_eq!(vad.state(), VadState::Silence);
    }

    #[test]
    fn test_speech_detection() {
        let mut vad = VoiceActivityDetector::new();
        let speech = generate_tone(2000.0, 480, 0.3);

        for _ in 0..5 {
            vad.process_frame(&speech).unwrap();
        }

        assert!(vad.is_speech_active());
    }

    #[test]
    fn test_energy_calculation() {
        let vad = VoiceActivityDetector::new();

        let silence = generate_silence(480);
        assert!(vad.calculate_energy(&silence) < 0.001);

        let tone = generate_tone(200.0, 480, 0.5);
        assert!(vad.calculate_energy(&tone) > 0.1);
    }

    #[test]
    fn test_zero_crossing_rate() {
        let vad = VoiceActivityDetector::new();

        let silence = generate_silence(480);
        let zcr_silence = vad.calculate_zero_crossing_rate(&silence);
        assert_relative_eq!(zcr_silence, 0.0, epsilon = 0.001);

        // A 2kHz tone crosses zero twice per 8-sample period
        let tone = generate_tone(2000.0, 480, 0.5);
        let zcr_tone = vad.calculate_zero_crossing_rate(&tone);
        assert_relative_eq!(zcr_tone, 0.25, epsilon = 0.01);
    }

    #[test]
    fn test_segment_boundaries() {
        let config = VadConfig {
            energy_threshold: 0.01,
            zcr_threshold: 0.1,
            frame_size: 480,
            speech_frames_required: 2,
            silence_frames_required: 3,
        };

        let mut vad = VoiceActivityDetector::with_config(config);
        let speech = generate_tone(2000.0, 480, 0.3);
        let silence = generate_silence(480);

        assert_eq!(vad.state(), VadState::Silence);

        assert_eq!(vad.process_frame(&speech).unwrap().boundary, None);
        assert_eq!(vad.state(), VadState::MaybeSpeech);

        let decision = vad.process_frame(&speech).unwrap();
        assert_eq!(
            decision.boundary,
            Some(SegmentBoundary::SpeechStarted { frames_back: 1 })
        );
        assert_eq!(vad.state(), VadState::Speech);

        assert_eq!(vad.process_frame(&silence).unwrap().boundary, None);
        assert_eq!(vad.state(), VadState::MaybeSilence);
        assert_eq!(vad.process_frame(&silence).unwrap().boundary, None);

        let decision = vad.process_frame(&silence).unwrap();
        assert_eq!(
            decision.boundary,
            Some(SegmentBoundary::SpeechEnded { frames_back: 2 })
        );
        assert!(!decision.speech_active);
        assert_eq!(vad.state(), VadState::Silence);
    }

    #[test]
    fn test_single_frame_confirmation() {
        let config = VadConfig {
            speech_frames_required: 1,
            silence_frames_required: 1,
            ..Default::default()
        };
        let mut vad = VoiceActivityDetector::with_config(config);
        let speech = generate_tone(2000.0, 480, 0.3);

        assert_eq!(
            vad.process_frame(&speech).unwrap().boundary,
            Some(SegmentBoundary::SpeechStarted { frames_back: 0 })
        );
        assert_eq!(
            vad.process_frame(&generate_silence(480)).unwrap().boundary,
            Some(SegmentBoundary::SpeechEnded { frames_back: 0 })
        );
    }

    #[test]
    fn test_reset() {
        let mut vad = VoiceActivityDetector::new();
        let speech = generate_tone(2000.0, 480, 0.3);

        for _ in 0..5 {
            vad.process_frame(&speech).unwrap();
        }
        assert!(vad.is_speech_active());

        vad.reset();
        assert_eq!(vad.state(), VadState::Silence);
        assert!(!vad.is_speech_active());
    }

    #[test]
    fn test_insufficient_data_error() {
        let mut vad = VoiceActivityDetector::new();
        let short_frame = vec![0; 100];

        match vad.process_frame(&short_frame) {
            Err(VadError::InsufficientData(required)) => assert_eq!(required, 480),
            other => panic!("Expected InsufficientData error, got {:?}", other),
        }
    }

    #[test]
    fn test_false_alarm_handling() {
        let config = VadConfig {
            speech_frames_required: 3,
            ..Default::default()
        };

        let mut vad = VoiceActivityDetector::with_config(config);
        let speech = generate_tone(2000.0, 480, 0.3);
        let silence = generate_silence(480);

        vad.process_frame(&speech).unwrap();
        assert_eq!(vad.state(), VadState::MaybeSpeech);

        vad.process_frame(&silence).unwrap();
        assert_eq!(vad.state(), VadState::Silence);
        assert!(!vad.is_speech_active());
    }
}
