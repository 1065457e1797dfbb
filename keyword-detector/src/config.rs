//! Service configuration
//!
//! Loaded from a JSON file named by `KWD_CONFIG`, or assembled from defaults
//! and individual environment variables when no file is given.

use crate::audio_format::SAMPLE_RATE;
use crate::detector::DetectorConfig;
use crate::engine::VadEngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming a JSON config file
pub const CONFIG_ENV: &str = "KWD_CONFIG";

/// Environment variable overriding the model path
pub const MODEL_PATH_ENV: &str = "KWD_MODEL_PATH";

/// Environment variable overriding the keyword
pub const KEYWORD_ENV: &str = "KWD_KEYWORD";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration of the keyword service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Seconds of audio the shared stream retains
    pub buffer_duration_secs: usize,

    /// Readers the stream admits at once (detector plus streamers)
    pub max_readers: usize,

    pub detector: DetectorConfig,

    pub engine: VadEngineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            buffer_duration_secs: 15,
            max_readers: 2,
            detector: DetectorConfig::default(),
            engine: VadEngineConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Parse a JSON config file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());

        Ok(config)
    }

    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve environment variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(model_path) = lookup(MODEL_PATH_ENV) {
            debug!("Model path overridden from environment: {}", model_path);
            config.engine.model_path = PathBuf::from(model_path);
        }

        if let Some(keyword) = lookup(KEYWORD_ENV) {
            debug!("Keyword overridden from environment: {}", keyword);
            config.engine.keyword = keyword;
        }

        config.validate()?;
        Ok(config)
    }

    /// Stream capacity in samples
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_duration_secs * SAMPLE_RATE as usize
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "buffer_duration_secs must be greater than 0".to_string(),
            ));
        }

        if self.max_readers == 0 {
            return Err(ConfigError::Invalid(
                "max_readers must be greater than 0".to_string(),
            ));
        }

        self.detector
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.engine
            .vad
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.detector.chunk_size > self.buffer_capacity() {
            return Err(ConfigError::Invalid(format!(
                "chunk_size {} exceeds the stream capacity of {} samples",
                self.detector.chunk_size,
                self.buffer_capacity()
            )));
        }

        Ok(())
    }
}
