//! Audio capture from microphone

use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleRate, Stream, StreamConfig};

use super::device::{AudioInput, FrameSender};
use super::pcm::{AudioFrame, EncodedPacket};
use super::{FRAME_SIZE, INPUT_SAMPLE_RATE};
use crate::transport::Transport;
use crate::{Error, Result};

/// Rechunks device callbacks into fixed-size frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples, returning every frame completed by them in order
    pub fn push(&mut self, mut samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();

        while !samples.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_size {
                let full =
                    std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(AudioFrame::new(full));
            }
        }

        frames
    }

    /// Samples waiting for the next frame boundary
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(FRAME_SIZE)
    }
}

/// Turns captured frames into outbound packets
///
/// Only exists while the session is connected, so frames can never be sent
/// before the channel opens or after teardown.
#[derive(Debug, Default)]
pub struct CapturePipeline {
    frames_sent: u64,
    frames_muted: u64,
}

impl CapturePipeline {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frames_sent: 0,
            frames_muted: 0,
        }
    }

    /// Encode and send one frame unless muted
    ///
    /// Returns true if a packet was handed to the transport
    pub fn process(
        &mut self,
        frame: &AudioFrame,
        muted: bool,
        transport: &mut dyn Transport,
    ) -> bool {
        if muted {
            self.frames_muted += 1;
            tracing::trace!(samples = frame.len(), "muted, dropping frame");
            return false;
        }

        transport.send(EncodedPacket::from_frame(frame));
        self.frames_sent += 1;
        tracing::trace!(seq = self.frames_sent, samples = frame.len(), "frame sent");
        true
    }

    #[must_use]
    pub const fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    #[must_use]
    pub const fn frames_muted(&self) -> u64 {
        self.frames_muted
    }
}

/// State shared with the device callback thread
struct CaptureTap {
    frames: Option<FrameSender>,
    assembler: FrameAssembler,
}

/// Captures audio from the default input device
pub struct AudioCapture {
    stream: Option<Stream>,
    tap: Arc<Mutex<CaptureTap>>,
}

impl AudioCapture {
    /// Acquire the default input device at 16kHz
    ///
    /// The stream is built here so permission failures surface during
    /// acquisition, but nothing is delivered until `start`.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if there is no usable microphone
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::PermissionDenied("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::PermissionDenied(e.to_string()))?
            .filter(|c| {
                c.min_sample_rate() <= SampleRate(INPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(INPUT_SAMPLE_RATE)
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio("no 16kHz input config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(INPUT_SAMPLE_RATE))
            .config();
        let channels = usize::from(config.channels);

        let tap = Arc::new(Mutex::new(CaptureTap {
            frames: None,
            assembler: FrameAssembler::default(),
        }));
        let callback_tap = Arc::clone(&tap);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut tap = callback_tap.lock().unwrap_or_else(PoisonError::into_inner);
                    let CaptureTap { frames, assembler } = &mut *tap;
                    let Some(frames) = frames.as_ref() else {
                        return;
                    };

                    let completed = if channels == 1 {
                        assembler.push(data)
                    } else {
                        assembler.push(&downmix(data, channels))
                    };

                    for frame in completed {
                        if frames.send(frame).is_err() {
                            break;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| match e {
                BuildStreamError::DeviceNotAvailable => {
                    Error::PermissionDenied("input device not available".to_string())
                }
                other => Error::Audio(other.to_string()),
            })?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = INPUT_SAMPLE_RATE,
            channels,
            "audio capture initialized"
        );

        Ok(Self {
            stream: Some(stream),
            tap,
        })
    }
}

impl AudioInput for AudioCapture {
    fn start(&mut self, frames: FrameSender) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::Audio("capture stream already closed".to_string()))?;

        {
            let mut tap = self.tap.lock().unwrap_or_else(PoisonError::into_inner);
            tap.assembler.clear();
            tap.frames = Some(frames);
        }

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        tracing::debug!("audio capture started");
        Ok(())
    }

    fn close(&mut self) {
        self.tap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frames
            .take();

        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// Average interleaved channels down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_emits_exact_frames() {
        let mut assembler = FrameAssembler::new(4);

        assert!(assembler.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(assembler.pending(), 3);

        let frames = assembler.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples(), &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames[1].samples(), &[0.5, 0.6, 0.7, 0.8]);
        assert_eq!(assembler.pending(), 1);
    }

    #[test]
    fn test_assembler_default_frame_size() {
        let mut assembler = FrameAssembler::default();
        let frames = assembler.push(&vec![0.0; FRAME_SIZE * 2 + 10]);

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == FRAME_SIZE));
        assert_eq!(assembler.pending(), 10);
    }

    #[test]
    fn test_assembler_clear_discards_partial() {
        let mut assembler = FrameAssembler::new(4);
        assembler.push(&[0.1, 0.2]);
        assembler.clear();

        let frames = assembler.push(&[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(frames[0].samples(), &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_downmix_averages_channels() {
        assert_eq!(downmix(&[0.25, 0.75, -1.0, 1.0], 2), vec![0.5, 0.0]);
    }
}
