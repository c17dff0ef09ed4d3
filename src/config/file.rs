//! TOML configuration file loading
//!
//! Supports `~/.config/live-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LiveVoiceConfigFile {
    /// Remote model configuration
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Session tuning
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Remote model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// API key (prefer the `GEMINI_API_KEY` env var)
    pub api_key: Option<String>,

    /// Model identifier (e.g. "gemini-2.5-flash-native-audio-preview-09-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Zephyr")
    pub voice: Option<String>,

    /// System instruction sent on setup
    pub system_instruction: Option<String>,

    /// Websocket endpoint override
    pub endpoint: Option<String>,
}

/// Session tuning
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Max unsent frames before the oldest is dropped
    pub outbound_queue_capacity: Option<usize>,

    /// Status poll interval in milliseconds
    pub status_tick_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LiveVoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LiveVoiceConfigFile {
    config_file_path().map_or_else(LiveVoiceConfigFile::default, |path| {
        load_config_file_from(&path)
    })
}

/// Load a TOML config file from an explicit path
///
/// Returns `LiveVoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> LiveVoiceConfigFile {
    if !path.exists() {
        return LiveVoiceConfigFile::default();
    }

    match read_config_file(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            LiveVoiceConfigFile::default()
        }
    }
}

/// Read and parse a TOML config file
///
/// # Errors
///
/// Returns `Io` if the file can't be read, `Toml` if it doesn't parse
pub fn read_config_file(path: &Path) -> Result<LiveVoiceConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/live-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("live-voice").join("config.toml"))
}
