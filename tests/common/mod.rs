//! Shared test utilities
//!
//! Scripted devices and transport that record every call, so tests can
//! drive a session without audio hardware or a network.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use live_voice::transport::EventSender;
use live_voice::voice::pcm::{encode, encode_base64};
use live_voice::voice::{
    AudioBackend, AudioInput, AudioOutput, EncodedPacket, FrameSender, OUTPUT_SAMPLE_RATE,
};
use live_voice::{Connector, Error, Result, Transport};

/// Call counts for one fake resource
#[derive(Debug, Default)]
pub struct CallLog {
    pub opened: AtomicUsize,
    pub started: AtomicUsize,
    pub flushed: AtomicUsize,
    pub closed: AtomicUsize,
}

impl CallLog {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn flushed(&self) -> usize {
        self.flushed.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Microphone that hands its frame sender back to the test
pub struct ScriptedInput {
    log: Arc<CallLog>,
    frames: Arc<Mutex<Option<FrameSender>>>,
    fail_start: bool,
}

impl AudioInput for ScriptedInput {
    fn start(&mut self, frames: FrameSender) -> Result<()> {
        self.log.started.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(Error::PermissionDenied("revoked by test".to_string()));
        }
        *self.frames.lock().unwrap() = Some(frames);
        Ok(())
    }

    fn close(&mut self) {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        self.frames.lock().unwrap().take();
    }
}

/// Output device whose clock only moves when the test says so
pub struct ManualOutput {
    log: Arc<CallLog>,
    clock: Arc<AtomicU64>,
    scheduled: Arc<Mutex<Vec<(u64, usize)>>>,
}

impl AudioOutput for ManualOutput {
    fn sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE
    }

    fn now(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn schedule(&mut self, start_at: u64, samples: Vec<f32>) {
        self.scheduled.lock().unwrap().push((start_at, samples.len()));
    }

    fn flush(&mut self, _now: u64) {
        self.log.flushed.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Audio backend built from `ScriptedInput` and `ManualOutput`
#[derive(Default)]
pub struct FakeBackend {
    pub input: Arc<CallLog>,
    pub output: Arc<CallLog>,
    pub clock: Arc<AtomicU64>,
    /// `(start_at, samples)` for every chunk handed to the output
    pub scheduled: Arc<Mutex<Vec<(u64, usize)>>>,
    /// Sender installed when capture starts
    pub frames: Arc<Mutex<Option<FrameSender>>>,
    pub deny_microphone: bool,
    /// Microphone opens but refuses to start streaming
    pub fail_capture_start: bool,
}

impl FakeBackend {
    pub fn denying_microphone() -> Self {
        Self {
            deny_microphone: true,
            ..Self::default()
        }
    }

    pub fn failing_capture_start() -> Self {
        Self {
            fail_capture_start: true,
            ..Self::default()
        }
    }

    /// Advance the output clock
    pub fn advance(&self, frames: u64) {
        self.clock.fetch_add(frames, Ordering::SeqCst);
    }

    pub fn scheduled(&self) -> Vec<(u64, usize)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn frame_sender(&self) -> Option<FrameSender> {
        self.frames.lock().unwrap().clone()
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(&self) -> Result<Box<dyn AudioInput>> {
        if self.deny_microphone {
            return Err(Error::PermissionDenied("denied by test".to_string()));
        }
        self.input.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedInput {
            log: Arc::clone(&self.input),
            frames: Arc::clone(&self.frames),
            fail_start: self.fail_capture_start,
        }))
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>> {
        self.output.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ManualOutput {
            log: Arc::clone(&self.output),
            clock: Arc::clone(&self.clock),
            scheduled: Arc::clone(&self.scheduled),
        }))
    }
}

/// Transport that records outbound packets
pub struct FakeTransport {
    sent: Arc<Mutex<Vec<EncodedPacket>>>,
    log: Arc<CallLog>,
}

impl Transport for FakeTransport {
    fn send(&mut self, packet: EncodedPacket) {
        self.sent.lock().unwrap().push(packet);
    }

    fn close(&mut self) {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// How `FakeConnector::connect` behaves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectMode {
    #[default]
    Succeed,
    Fail,
    /// Never resolves
    Hang,
}

/// Connector that keeps the event sender so tests can play the server
#[derive(Default)]
pub struct FakeConnector {
    pub mode: ConnectMode,
    pub sent: Arc<Mutex<Vec<EncodedPacket>>>,
    pub transport: Arc<CallLog>,
    pub events: Mutex<Option<EventSender>>,
}

impl FakeConnector {
    pub fn with_mode(mode: ConnectMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<EncodedPacket> {
        self.sent.lock().unwrap().clone()
    }

    pub fn event_sender(&self) -> Option<EventSender> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, events: EventSender) -> Result<Box<dyn Transport>> {
        match self.mode {
            ConnectMode::Succeed => {}
            ConnectMode::Fail => {
                return Err(Error::Transport("connection refused".to_string()));
            }
            ConnectMode::Hang => std::future::pending::<()>().await,
        }

        self.transport.opened.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);
        Ok(Box::new(FakeTransport {
            sent: Arc::clone(&self.sent),
            log: Arc::clone(&self.transport),
        }))
    }
}

/// Generate sine wave audio samples
pub fn generate_sine_samples(
    frequency: f32,
    sample_rate: u32,
    duration_secs: f32,
    amplitude: f32,
) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// A server audio packet at the output rate
pub fn model_audio(samples: &[f32]) -> EncodedPacket {
    EncodedPacket {
        data: encode_base64(&encode(samples)),
        mime_type: format!("audio/pcm;rate={OUTPUT_SAMPLE_RATE}"),
    }
}
