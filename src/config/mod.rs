//! Configuration management for live voice sessions

pub mod file;

use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};

/// Default live model with native audio output
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Default system instruction
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful conversational assistant.";

/// Gemini Live websocket endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Unsent frames held before dropping the oldest (~8s of audio)
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 32;

/// How often playback status is re-evaluated
pub const DEFAULT_STATUS_TICK: Duration = Duration::from_millis(50);

/// Tolerance when deciding playback has caught up, so status does not
/// flicker between speaking and listening on chunk boundaries
pub const SPEAKING_SLACK: Duration = Duration::from_millis(100);

/// Live voice configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Remote model configuration
    pub live: LiveConfig,

    /// Session tuning
    pub session: SessionConfig,
}

/// Remote model configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// API key for the live endpoint
    pub api_key: Option<SecretString>,

    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice_name: String,

    /// System instruction sent on setup
    pub system_instruction: String,

    /// Websocket endpoint
    pub endpoint: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            voice_name: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Max unsent outbound frames
    pub outbound_queue_capacity: usize,

    /// Status poll interval
    pub status_tick: Duration,
}

impl SessionConfig {
    /// Playback slack used for the speaking/listening decision
    #[must_use]
    pub const fn speaking_slack(&self) -> Duration {
        SPEAKING_SLACK
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            status_tick: DEFAULT_STATUS_TICK,
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a resolved value is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an env lookup
    ///
    /// # Errors
    ///
    /// Returns `Config` if a resolved value is invalid
    pub fn from_sources(
        fc: file::LiveVoiceConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let live = LiveConfig {
            api_key: env("GEMINI_API_KEY")
                .or_else(|| env("API_KEY"))
                .or(fc.live.api_key)
                .filter(|key| !key.trim().is_empty())
                .map(SecretString::from),
            model: env("LIVE_VOICE_MODEL")
                .or(fc.live.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice_name: env("LIVE_VOICE_VOICE")
                .or(fc.live.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            system_instruction: env("LIVE_VOICE_SYSTEM_INSTRUCTION")
                .or(fc.live.system_instruction)
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            endpoint: env("LIVE_VOICE_ENDPOINT")
                .or(fc.live.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        };

        let outbound_queue_capacity = env("LIVE_VOICE_QUEUE_CAPACITY")
            .and_then(|s| s.parse().ok())
            .or(fc.session.outbound_queue_capacity)
            .unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAPACITY);

        if outbound_queue_capacity == 0 {
            return Err(Error::Config(
                "outbound_queue_capacity must be at least 1".to_string(),
            ));
        }

        let status_tick = env("LIVE_VOICE_STATUS_TICK_MS")
            .and_then(|s| s.parse().ok())
            .or(fc.session.status_tick_ms)
            .map_or(DEFAULT_STATUS_TICK, Duration::from_millis);

        if status_tick.is_zero() {
            return Err(Error::Config("status_tick_ms must be positive".to_string()));
        }

        Ok(Self {
            live,
            session: SessionConfig {
                outbound_queue_capacity,
                status_tick,
            },
        })
    }
}
