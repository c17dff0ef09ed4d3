//! Audio hardware seam
//!
//! The session core only sees these traits. `CpalBackend` is the real
//! implementation; tests substitute scripted devices.

use tokio::sync::mpsc;

use super::capture::AudioCapture;
use super::pcm::AudioFrame;
use super::playback::AudioPlayback;
use crate::Result;

/// Delivers assembled frames from the device thread to the session loop
pub type FrameSender = mpsc::UnboundedSender<AudioFrame>;

/// A microphone stream that has been acquired but not necessarily started
pub trait AudioInput {
    /// Begin delivering frames
    ///
    /// # Errors
    ///
    /// Returns error if the underlying stream cannot be started
    fn start(&mut self, frames: FrameSender) -> Result<()>;

    /// Stop the stream and release the device. Idempotent.
    fn close(&mut self);
}

/// An output device with a sample-accurate clock
///
/// Times are frame counts on the device timeline at `sample_rate()`.
pub trait AudioOutput {
    fn sample_rate(&self) -> u32;

    /// Frames rendered so far
    fn now(&self) -> u64;

    /// Queue samples to begin at `start_at`
    fn schedule(&mut self, start_at: u64, samples: Vec<f32>);

    /// Drop everything scheduled at or after `now`; audio already playing finishes
    fn flush(&mut self, now: u64);

    /// Stop the stream and release the device. Idempotent.
    fn close(&mut self);
}

/// Opens input and output devices for a session
pub trait AudioBackend {
    /// Acquire the microphone
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if the microphone is unavailable
    fn open_input(&self) -> Result<Box<dyn AudioInput>>;

    /// Acquire the speaker
    ///
    /// # Errors
    ///
    /// Returns error if no usable output device exists
    fn open_output(&self) -> Result<Box<dyn AudioOutput>>;
}

/// Default host devices through `cpal`
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(&self) -> Result<Box<dyn AudioInput>> {
        Ok(Box::new(AudioCapture::open()?))
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(AudioPlayback::open()?))
    }
}
