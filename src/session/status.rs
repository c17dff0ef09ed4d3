//! Session status labels for display

use std::fmt;

use crate::Error;

/// Why a session ended in error, in user-facing terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
    /// Microphone access was refused
    MicrophoneDenied,
    /// The channel to the model failed
    Connection,
    /// An audio device could not be used
    AudioDevice,
    /// Missing or invalid configuration
    Configuration,
}

impl ErrorReason {
    /// Plain-language description
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::MicrophoneDenied => "Microphone access denied",
            Self::Connection => "Connection error",
            Self::AudioDevice => "Audio device error",
            Self::Configuration => "Configuration error",
        }
    }
}

impl From<&Error> for ErrorReason {
    fn from(error: &Error) -> Self {
        match error {
            Error::PermissionDenied(_) => Self::MicrophoneDenied,
            Error::Transport(_) => Self::Connection,
            Error::Config(_) => Self::Configuration,
            _ => Self::AudioDevice,
        }
    }
}

/// Current state of a voice session
///
/// `Listening` and `Speaking` describe which direction dominates; capture
/// keeps running in both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Listening,
    Speaking,
    Interrupted,
    Error(ErrorReason),
    Closed,
}

impl SessionStatus {
    /// Error and Closed are final
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Error(_) | Self::Closed)
    }

    /// Connected and exchanging audio
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Listening | Self::Speaking | Self::Interrupted)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting...",
            Self::Listening => "Listening...",
            Self::Speaking => "Speaking...",
            Self::Interrupted => "Interrupted",
            Self::Error(reason) => reason.label(),
            Self::Closed => "Closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SessionStatus::Closed.is_terminal());
        assert!(SessionStatus::Error(ErrorReason::Connection).is_terminal());
        assert!(!SessionStatus::Speaking.is_terminal());
        assert!(!SessionStatus::Idle.is_terminal());
    }

    #[test]
    fn test_error_labels_are_plain() {
        let status = SessionStatus::Error(ErrorReason::from(&Error::PermissionDenied(
            "NotAllowedError: dom exception 0x1f".to_string(),
        )));
        assert_eq!(status.to_string(), "Microphone access denied");
    }

    #[test]
    fn test_reason_mapping() {
        assert_eq!(
            ErrorReason::from(&Error::Transport("reset".to_string())),
            ErrorReason::Connection
        );
        assert_eq!(
            ErrorReason::from(&Error::Audio("no device".to_string())),
            ErrorReason::AudioDevice
        );
        assert_eq!(
            ErrorReason::from(&Error::Config("no key".to_string())),
            ErrorReason::Configuration
        );
    }
}
