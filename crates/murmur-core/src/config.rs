//! Configuration management for murmur.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{APP_NAME, EnginePreference, ModelSize};

/// Persisted configuration for the application.
///
/// Everything here is a default; per-call options on the transcription
/// request override it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Preferred engine variant ("auto", "faster-whisper", "whisper-cpp",
    /// "openai-whisper")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,

    /// Explicit path to an engine binary, tried before auto-detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_path: Option<PathBuf>,

    /// Accept `engine_path` on file existence alone, skipping the version
    /// probe. For binaries that fail version probes on atypical CPUs.
    #[serde(default, skip_serializing_if = "is_false")]
    pub force_engine_path: bool,

    /// Model size to transcribe with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Language code (ISO 639-1) or "auto" for detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Ask the engine for word-level timestamps
    #[serde(default, skip_serializing_if = "is_false")]
    pub word_timestamps: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Config {
    /// Parsed engine preference, defaulting to auto-detection.
    ///
    /// An unparseable name falls back to auto with a warning rather than
    /// failing the whole load.
    pub fn engine_preference(&self) -> EnginePreference {
        match self.engine.as_deref() {
            None => EnginePreference::Auto,
            Some(name) => EnginePreference::from_name(name).unwrap_or_else(|| {
                warn!(engine = name, "Unknown engine in config, using auto");
                EnginePreference::Auto
            }),
        }
    }

    /// Parsed model size, defaulting to base.
    pub fn model_size(&self) -> ModelSize {
        match self.model.as_deref() {
            None => ModelSize::default(),
            Some(name) => ModelSize::from_name(name).unwrap_or_else(|| {
                warn!(model = name, "Unknown model in config, using base");
                ModelSize::default()
            }),
        }
    }

    /// Get the configured language, `None` meaning auto-detect.
    pub fn language(&self) -> Option<&str> {
        match self.language.as_deref() {
            Some("auto") | None => None,
            Some(lang) => Some(lang),
        }
    }

    /// Get the configured engine binary path.
    pub fn engine_path(&self) -> Option<&std::path::Path> {
        self.engine_path.as_deref()
    }
}

/// Manages loading and saving configuration files.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the default configuration directory.
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Creates a new ConfigManager with a specified configuration directory.
    pub fn with_config_dir<P: AsRef<std::path::Path>>(dir: P) -> Self {
        let config_path = dir.as_ref().join(format!("{}.toml", APP_NAME));
        Self { config_path }
    }

    /// Returns the default path to the configuration file.
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to retrieve configuration directory")?;
        Ok(config_dir.join(APP_NAME).join(format!("{}.toml", APP_NAME)))
    }

    /// Loads the configuration from the config file or returns default.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file at {:?}", self.config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file at {:?}", self.config_path))?;

        Ok(config)
    }

    /// Saves the configuration to the config file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.config_path))?;

        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory at {:?}", config_dir))?;

        let serialized =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file at {:?}", self.config_path))?;

        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }
}
