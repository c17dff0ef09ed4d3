//! Bidirectional streaming channel to the remote voice model
//!
//! The session depends only on `Transport` and the `TransportEvent` stream;
//! concrete adapters (see `gemini`) own the wire protocol.

pub mod gemini;
mod queue;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use gemini::{GeminiLiveConnector, GeminiLiveTransport};
pub use queue::OutboundQueue;

use crate::Result;
use crate::voice::EncodedPacket;

/// Delivers transport events to the session loop
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Lifecycle and data events raised by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The remote side is ready to stream
    Open,
    /// A server message arrived
    Message(InboundMessage),
    /// Channel-level failure; a `Close` follows
    Error(String),
    /// The channel is gone
    Close,
}

/// One server message
///
/// Either part may be absent; a message can be a pure status update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    /// Synthesized audio
    pub audio: Option<EncodedPacket>,
    /// The model's utterance was cut off by new input
    pub interrupted: bool,
    /// The model finished its turn
    pub turn_complete: bool,
}

impl InboundMessage {
    /// A message carrying one audio packet
    #[must_use]
    pub const fn audio(packet: EncodedPacket) -> Self {
        Self {
            audio: Some(packet),
            interrupted: false,
            turn_complete: false,
        }
    }

    /// A bare interruption signal
    #[must_use]
    pub const fn interruption() -> Self {
        Self {
            audio: None,
            interrupted: true,
            turn_complete: false,
        }
    }
}

/// Outbound half of an open channel
pub trait Transport: Send {
    /// Queue a packet for sending. Fire-and-forget.
    fn send(&mut self, packet: EncodedPacket);

    /// Close the channel. Idempotent.
    fn close(&mut self);

    /// Packets discarded because the outbound queue overflowed
    fn dropped(&self) -> u64 {
        0
    }
}

/// Opens transports
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel whose events are delivered on `events`
    ///
    /// `Open` is raised once the remote side is ready; `Error`/`Close` may
    /// arrive at any time after this returns.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the connection cannot be established
    async fn connect(&self, events: EventSender) -> Result<Box<dyn Transport>>;
}
