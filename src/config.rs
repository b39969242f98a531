//! Configuration loading and defaults.
//!
//! Every field has a default, so a missing or partial config file is fine.
//! Environment variables override the file for the settings that change
//! most between machines.

use crate::defaults;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub conversation: ConversationConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; `None` selects the system default.
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_duration_ms: defaults::FRAME_DURATION_MS,
        }
    }
}

impl AudioConfig {
    /// Samples per voice-activity frame for this configuration.
    pub fn frame_samples(&self) -> usize {
        defaults::frame_samples(self.sample_rate, self.frame_duration_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub listen_timeout_ms: u64,
    pub max_consecutive_errors: u32,
    pub error_backoff_ms: u64,
    /// Spoken before the first turn; an empty string skips the greeting.
    pub greeting: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            listen_timeout_ms: defaults::LISTEN_TIMEOUT_MS,
            max_consecutive_errors: defaults::MAX_CONSECUTIVE_ERRORS,
            error_backoff_ms: defaults::ERROR_BACKOFF_MS,
            greeting: defaults::GREETING.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Directory for the primary (temp file) tier; system temp when unset.
    pub temp_dir: Option<PathBuf>,
    /// Directory for the secondary tier; the user's documents directory
    /// when unset.
    pub fallback_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from the default path if it exists, otherwise use defaults.
    /// Environment overrides apply either way.
    pub fn load_or_default() -> Result<Self> {
        let config = match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path)?,
            _ => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides:
    /// - `TALKBACK_AUDIO_DEVICE` overrides `audio.device`
    /// - `TALKBACK_FALLBACK_DIR` overrides `persistence.fallback_dir`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("TALKBACK_AUDIO_DEVICE") {
            if !device.is_empty() {
                self.audio.device = Some(device);
            }
        }
        if let Ok(dir) = std::env::var("TALKBACK_FALLBACK_DIR") {
            if !dir.is_empty() {
                self.persistence.fallback_dir = Some(PathBuf::from(dir));
            }
        }
        self
    }

    /// Default config file location: `~/.config/talkback/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("talkback").join("config.toml"))
    }
}
