//! Error types for live voice sessions

use thiserror::Error;

/// Result type alias for live voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a live voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone access refused or no capture device present
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Channel-level failure talking to the remote model
    #[error("transport error: {0}")]
    Transport(String),

    /// An audio packet could not be decoded
    #[error("malformed audio: {0}")]
    MalformedAudio(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Session lifecycle misuse
    #[error("session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
