//! Live Voice - real-time duplex voice sessions with a streaming speech model
//!
//! Captures microphone audio, streams it to a remote model, and plays the
//! synthesized reply back without gaps or overlaps:
//! - PCM16 codec and base64 transport encoding
//! - Fixed-cadence capture with mute
//! - Gapless playback scheduling with interruption flush
//! - Session state machine owning every acquired resource
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   frames   ┌──────────────┐  packets  ┌───────────┐
//! │ Capture  ├───────────▶│ VoiceSession ├──────────▶│ Transport │◀──▶ model
//! └──────────┘            │ (state mach.)│◀──────────┤           │
//!                         └──────┬───────┘  events   └───────────┘
//!                                │ chunks
//!                         ┌──────▼───────┐
//!                         │  Playback    │──▶ speaker
//!                         │  Scheduler   │
//!                         └──────────────┘
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{Control, ErrorReason, SessionStats, SessionStatus, VoiceSession, run_session};
pub use transport::{Connector, GeminiLiveConnector, InboundMessage, Transport, TransportEvent};
pub use voice::{AudioBackend, CpalBackend};
