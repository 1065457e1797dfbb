//! Audio format descriptor shared by the stream producer and the detector.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Sample rate of the reference pipeline format (16kHz)
pub const SAMPLE_RATE: u32 = 16000;

/// Sample type of the reference format (16-bit PCM)
pub type AudioSample = i16;

/// Samples per millisecond at [`SAMPLE_RATE`]
pub const SAMPLES_PER_MS: u64 = SAMPLE_RATE as u64 / 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Invalid sample rate: {0} Hz (must be > 0)")]
    InvalidSampleRate(u32),

    #[error("Invalid sample size: {0} bits (must be a non-zero multiple of 8)")]
    InvalidSampleSize(u16),

    #[error("Invalid channel count: {0} (must be > 0)")]
    InvalidChannelCount(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Linear integer PCM
    Lpcm,
    /// IEEE float PCM
    Float,
    Opus,
}

/// Audio format specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub sample_size_in_bits: u16,
    pub num_channels: u16,
    pub endianness: Endianness,
    pub encoding: Encoding,
}

impl AudioFormat {
    /// 16kHz, 16-bit, mono, little-endian linear PCM
    pub fn reference() -> Self {
        Self {
            sample_rate_hz: SAMPLE_RATE,
            sample_size_in_bits: 16,
            num_channels: 1,
            endianness: Endianness::Little,
            encoding: Encoding::Lpcm,
        }
    }

    /// Describe the PCM payload of a WAV file. WAV data is always little-endian.
    pub fn from_wav_spec(spec: &hound::WavSpec) -> Self {
        let encoding = match spec.sample_format {
            hound::SampleFormat::Int => Encoding::Lpcm,
            hound::SampleFormat::Float => Encoding::Float,
        };

        Self {
            sample_rate_hz: spec.sample_rate,
            sample_size_in_bits: spec.bits_per_sample,
            num_channels: spec.channels,
            endianness: Endianness::Little,
            encoding,
        }
    }

    /// Bytes occupied by one sample of one channel
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.sample_size_in_bits / 8)
    }

    /// Bytes occupied by one frame across all channels
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.num_channels)
    }

    /// Validate format parameters
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.sample_rate_hz == 0 {
            return Err(FormatError::InvalidSampleRate(self.sample_rate_hz));
        }

        if self.sample_size_in_bits == 0 || self.sample_size_in_bits % 8 != 0 {
            return Err(FormatError::InvalidSampleSize(self.sample_size_in_bits));
        }

        if self.num_channels == 0 {
            return Err(FormatError::InvalidChannelCount(self.num_channels));
        }

        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::reference()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}-bit/{}ch/{:?}/{:?}",
            self.sample_rate_hz,
            self.sample_size_in_bits,
            self.num_channels,
            self.endianness,
            self.encoding
        )
    }
}
