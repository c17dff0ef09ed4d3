//! Live voice session
//!
//! `VoiceSession` is the state machine that wires microphone capture to the
//! transport and the transport to playback. It is driven from a single task
//! (see `run_session`): every handler is synchronous and never blocks, and
//! only acquisition awaits.
//!
//! ```text
//! Idle ─start─▶ Connecting ─open─▶ Listening ◀──caught up── Speaking
//!                   │                  │  └──first audio──▶    │
//!                   │                  │                  interrupted
//!                   ▼                  ▼                       ▼
//!              Error/Closed       Error/Closed            Interrupted ─▶ Listening
//! ```
//!
//! Every acquired resource lives in an `Option` owned by the session and is
//! released through `take()`, so teardown from any state, any number of
//! times, closes each resource exactly once.

mod runner;
mod status;

use tokio::sync::watch;

pub use runner::{Control, run_session};
pub use status::{ErrorReason, SessionStatus};

use crate::config::SessionConfig;
use crate::transport::{Connector, EventSender, InboundMessage, Transport, TransportEvent};
use crate::voice::{
    AudioBackend, AudioFrame, AudioInput, CapturePipeline, DecodedChunk, EncodedPacket,
    FrameSender, PlaybackScheduler,
};
use crate::{Error, Result};

/// Channels the session hands to its devices and transport
#[derive(Debug, Clone)]
pub struct SessionLinks {
    /// Captured frames flow back to the session loop here
    pub frames: FrameSender,
    /// Transport events flow back to the session loop here
    pub events: EventSender,
}

/// Counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames encoded and handed to the transport
    pub frames_sent: u64,
    /// Frames discarded while muted
    pub frames_muted: u64,
    /// Inbound chunks placed on the playback timeline
    pub chunks_scheduled: u64,
    /// Inbound packets that failed to decode
    pub malformed_dropped: u64,
    /// Outbound frames evicted from a full send queue
    pub outbound_dropped: u64,
}

/// A single-use real-time voice session
pub struct VoiceSession {
    config: SessionConfig,
    status: watch::Sender<SessionStatus>,
    muted: bool,
    frames: Option<FrameSender>,
    input: Option<Box<dyn AudioInput>>,
    playback: Option<PlaybackScheduler>,
    transport: Option<Box<dyn Transport>>,
    capture: Option<CapturePipeline>,
    stats: SessionStats,
}

impl VoiceSession {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let (status, _) = watch::channel(SessionStatus::Idle);
        Self {
            config,
            status,
            muted: false,
            frames: None,
            input: None,
            playback: None,
            transport: None,
            capture: None,
            stats: SessionStats::default(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub const fn is_muted(&self) -> bool {
        self.muted
    }

    /// Mute or unmute capture; applies from the next frame
    pub fn set_muted(&mut self, muted: bool) {
        if self.muted != muted {
            self.muted = muted;
            tracing::info!(muted, "microphone mute changed");
        }
    }

    /// Playback cursor in output frames, while playback is held
    #[must_use]
    pub fn playback_cursor(&self) -> Option<u64> {
        self.playback.as_ref().map(PlaybackScheduler::cursor)
    }

    /// Snapshot of the session counters
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats;
        if let Some(capture) = &self.capture {
            stats.frames_sent += capture.frames_sent();
            stats.frames_muted += capture.frames_muted();
        }
        if let Some(transport) = &self.transport {
            stats.outbound_dropped = transport.dropped();
        }
        stats
    }

    /// Acquire devices and open the transport
    ///
    /// Sessions are single-use: starting a session that has left `Idle` is
    /// rejected. On failure the session is already in `Error` with every
    /// partially acquired resource released.
    ///
    /// # Errors
    ///
    /// Returns `Session` if already started, otherwise the acquisition error
    pub async fn start(
        &mut self,
        backend: &dyn AudioBackend,
        connector: &dyn Connector,
        links: SessionLinks,
    ) -> Result<()> {
        let status = self.status();
        if status != SessionStatus::Idle {
            tracing::warn!(%status, "start ignored, session already started");
            return Err(Error::Session(format!("session already started ({status})")));
        }

        self.transition(SessionStatus::Connecting);

        if let Err(e) = self.acquire(backend, connector, links).await {
            tracing::error!(error = %e, "failed to start live session");
            self.fail(&e);
            return Err(e);
        }

        Ok(())
    }

    async fn acquire(
        &mut self,
        backend: &dyn AudioBackend,
        connector: &dyn Connector,
        links: SessionLinks,
    ) -> Result<()> {
        self.playback = Some(PlaybackScheduler::new(backend.open_output()?));
        self.input = Some(backend.open_input()?);
        self.frames = Some(links.frames);
        self.transport = Some(connector.connect(links.events).await?);
        tracing::debug!("session resources acquired");
        Ok(())
    }

    /// Apply a control command
    pub fn apply(&mut self, control: Control) {
        match control {
            Control::SetMuted(muted) => self.set_muted(muted),
            Control::ToggleMute => self.set_muted(!self.muted),
            Control::Close => self.close(),
        }
    }

    /// Dispatch a transport event
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::Error(cause) => self.on_transport_error(&cause),
            TransportEvent::Close => self.on_remote_close(),
        }
    }

    fn on_open(&mut self) {
        if self.status() != SessionStatus::Connecting {
            tracing::debug!(status = %self.status(), "ignoring open outside connecting");
            return;
        }

        let (Some(input), Some(frames)) = (self.input.as_mut(), self.frames.take()) else {
            tracing::warn!("channel opened without an acquired microphone");
            return;
        };

        if let Err(e) = input.start(frames) {
            tracing::error!(error = %e, "failed to start capture");
            self.fail(&e);
            return;
        }

        self.capture = Some(CapturePipeline::new());
        self.transition(SessionStatus::Listening);
    }

    fn on_message(&mut self, message: InboundMessage) {
        if !self.status().is_live() {
            tracing::trace!(status = %self.status(), "ignoring message outside live session");
            return;
        }

        if let Some(packet) = &message.audio {
            self.play_packet(packet);
        }

        if message.interrupted {
            self.interrupt();
        }

        if message.turn_complete {
            tracing::debug!("model turn complete");
        }
    }

    fn play_packet(&mut self, packet: &EncodedPacket) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };

        let chunk = match DecodedChunk::from_packet(packet).and_then(|chunk| {
            if chunk.sample_rate() == playback.sample_rate() {
                Ok(chunk)
            } else {
                Err(Error::MalformedAudio(format!(
                    "unexpected sample rate {}",
                    chunk.sample_rate()
                )))
            }
        }) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.stats.malformed_dropped += 1;
                tracing::warn!(error = %e, "dropping inbound audio packet");
                return;
            }
        };

        if chunk.frames() == 0 {
            tracing::debug!("ignoring empty inbound audio packet");
            return;
        }

        let duration = chunk.duration();
        let start_at = playback.schedule(chunk);
        self.stats.chunks_scheduled += 1;
        tracing::trace!(start_at, duration_ms = duration.as_millis(), "inbound chunk scheduled");

        if self.status() == SessionStatus::Interrupted {
            self.transition(SessionStatus::Listening);
        }
        if self.status() == SessionStatus::Listening {
            self.transition(SessionStatus::Speaking);
        }
    }

    fn interrupt(&mut self) {
        if let Some(playback) = self.playback.as_mut() {
            playback.interrupt();
        }

        if self.status() == SessionStatus::Speaking {
            self.transition(SessionStatus::Interrupted);
        } else {
            tracing::debug!(status = %self.status(), "interruption with nothing playing");
        }
    }

    /// Feed one captured frame to the transport
    pub fn on_capture_frame(&mut self, frame: AudioFrame) {
        let (Some(capture), Some(transport)) = (self.capture.as_mut(), self.transport.as_mut())
        else {
            tracing::trace!("capture frame outside live session, dropped");
            return;
        };

        capture.process(&frame, self.muted, &mut **transport);
    }

    /// Re-evaluate playback-derived status
    pub fn tick(&mut self) {
        match self.status() {
            SessionStatus::Speaking => {
                let caught_up = self
                    .playback
                    .as_ref()
                    .is_none_or(|p| p.is_caught_up(self.config.speaking_slack()));
                if caught_up {
                    self.transition(SessionStatus::Listening);
                }
            }
            SessionStatus::Interrupted => self.transition(SessionStatus::Listening),
            _ => {}
        }
    }

    /// Close the session. A second close is a no-op.
    pub fn close(&mut self) {
        if self.status().is_terminal() {
            tracing::debug!(status = %self.status(), "close ignored, session already ended");
            return;
        }
        self.release();
        self.transition(SessionStatus::Closed);
    }

    fn on_remote_close(&mut self) {
        if self.status().is_terminal() {
            return;
        }
        tracing::info!("remote closed the live session");
        self.close();
    }

    fn on_transport_error(&mut self, cause: &str) {
        if self.status().is_terminal() {
            return;
        }
        tracing::error!(cause, "live transport error");
        self.fail(&Error::Transport(cause.to_string()));
    }

    fn fail(&mut self, error: &Error) {
        self.release();
        self.transition(SessionStatus::Error(ErrorReason::from(error)));
    }

    /// Stop capture, close both audio devices, close the transport
    fn release(&mut self) {
        if let Some(capture) = self.capture.take() {
            self.stats.frames_sent += capture.frames_sent();
            self.stats.frames_muted += capture.frames_muted();
        }
        self.frames = None;

        let mut released = false;

        if let Some(mut input) = self.input.take() {
            input.close();
            released = true;
        }
        if let Some(mut playback) = self.playback.take() {
            playback.close();
            released = true;
        }
        if let Some(mut transport) = self.transport.take() {
            self.stats.outbound_dropped = transport.dropped();
            transport.close();
            released = true;
        }

        if released {
            let stats = self.stats;
            tracing::info!(
                frames_sent = stats.frames_sent,
                frames_muted = stats.frames_muted,
                chunks_scheduled = stats.chunks_scheduled,
                malformed_dropped = stats.malformed_dropped,
                outbound_dropped = stats.outbound_dropped,
                "session resources released"
            );
        }
    }

    fn transition(&self, next: SessionStatus) {
        let previous = self.status.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "session status");
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.release();
    }
}
