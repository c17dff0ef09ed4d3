//! Cooperative event loop driving a `VoiceSession`
//!
//! Control commands, transport events, captured frames and the status tick
//! all interleave on one task. Each source is FIFO; the sources are not
//! ordered relative to each other.

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::{SessionLinks, SessionStats, VoiceSession};
use crate::transport::Connector;
use crate::voice::AudioBackend;

/// Commands from the surrounding UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    SetMuted(bool),
    ToggleMute,
    Close,
}

/// Run a session from `Idle` until it reaches a terminal state
///
/// A `Close` (or a dropped control sender) while devices are still being
/// acquired abandons acquisition and releases whatever was already held.
#[allow(clippy::future_not_send)]
pub async fn run_session(
    session: &mut VoiceSession,
    backend: &dyn AudioBackend,
    connector: &dyn Connector,
    mut control: mpsc::UnboundedReceiver<Control>,
) -> SessionStats {
    let (frame_tx, mut frames) = mpsc::unbounded_channel();
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let links = SessionLinks {
        frames: frame_tx,
        events: event_tx,
    };

    let mut muted = session.is_muted();
    let mut cancelled = false;

    {
        let start = session.start(backend, connector, links);
        tokio::pin!(start);

        loop {
            tokio::select! {
                _ = &mut start => break,
                command = control.recv() => match command {
                    Some(Control::SetMuted(value)) => muted = value,
                    Some(Control::ToggleMute) => muted = !muted,
                    Some(Control::Close) | None => {
                        cancelled = true;
                        break;
                    }
                },
            }
        }
    }

    session.set_muted(muted);

    if cancelled {
        tracing::info!("session closed during connect");
        session.close();
        return session.stats();
    }

    let mut ticker = tokio::time::interval(session.config().status_tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !session.status().is_terminal() {
        tokio::select! {
            command = control.recv() => match command {
                Some(command) => session.apply(command),
                None => session.close(),
            },
            Some(event) = events.recv() => session.handle_event(event),
            Some(frame) = frames.recv() => session.on_capture_frame(frame),
            _ = ticker.tick() => session.tick(),
        }
    }

    session.stats()
}
