//! Audio playback to speakers
//!
//! `PlaybackScheduler` places decoded chunks back-to-back on the output
//! device's timeline; `AudioPlayback` is the `cpal` device that renders it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::OUTPUT_SAMPLE_RATE;
use super::device::AudioOutput;
use super::pcm::{DecodedChunk, frames_to_duration};
use crate::{Error, Result};

/// Schedules chunks gaplessly on the output timeline
///
/// The cursor is the earliest frame the next chunk may start at. Every
/// read-modify-write of it happens under `&mut self`; a multi-threaded
/// caller must wrap the scheduler in a lock rather than share the cursor.
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    cursor: u64,
    closed: bool,
}

impl PlaybackScheduler {
    #[must_use]
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        let cursor = output.now();
        Self {
            output,
            cursor,
            closed: false,
        }
    }

    /// Schedule a chunk at `max(cursor, now)` and advance the cursor past it
    ///
    /// Returns the start frame.
    pub fn schedule(&mut self, chunk: DecodedChunk) -> u64 {
        let start_at = self.cursor.max(self.output.now());
        let frames = chunk.frames();

        self.cursor = start_at + frames;
        self.output.schedule(start_at, chunk.into_samples());

        tracing::trace!(start_at, frames, cursor = self.cursor, "chunk scheduled");
        start_at
    }

    /// Abandon queued audio and pull the cursor back to the device clock
    pub fn interrupt(&mut self) {
        let now = self.output.now();
        let abandoned = self.cursor.saturating_sub(now);

        self.output.flush(now);
        self.cursor = now;

        tracing::debug!(
            abandoned_ms = frames_to_duration(abandoned, self.output.sample_rate()).as_millis(),
            "playback flushed"
        );
    }

    /// Whether the device has played (nearly) everything scheduled
    #[must_use]
    pub fn is_caught_up(&self, slack: Duration) -> bool {
        let slack = duration_to_frames(slack, self.output.sample_rate());
        self.output.now() + slack >= self.cursor
    }

    /// Scheduled audio not yet played
    #[must_use]
    pub fn backlog(&self) -> Duration {
        frames_to_duration(
            self.cursor.saturating_sub(self.output.now()),
            self.output.sample_rate(),
        )
    }

    #[must_use]
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Current device time in frames
    #[must_use]
    pub fn now(&self) -> u64 {
        self.output.now()
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    /// Close the output device. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.output.close();
        }
    }
}

/// Convert a duration to frames at `sample_rate`, rounding down
#[must_use]
pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> u64 {
    let frames = duration.as_nanos() * u128::from(sample_rate) / 1_000_000_000;
    u64::try_from(frames).unwrap_or(u64::MAX)
}

/// A chunk placed on the device timeline
#[derive(Debug)]
struct ScheduledChunk {
    start: u64,
    samples: Vec<f32>,
}

impl ScheduledChunk {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Chunks ordered by start frame, rendered by the output callback
#[derive(Debug, Default)]
struct Timeline {
    chunks: VecDeque<ScheduledChunk>,
}

impl Timeline {
    fn insert(&mut self, start: u64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        self.chunks.push_back(ScheduledChunk { start, samples });
    }

    fn flush(&mut self, now: u64) {
        self.chunks.retain(|chunk| chunk.start < now);
    }

    /// Render `out` (interleaved, `channels` wide) starting at frame `start`
    fn render(&mut self, start: u64, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);

        for (offset, frame) in out.chunks_mut(channels).enumerate() {
            let t = start + offset as u64;
            let mut value = 0.0f32;

            for chunk in &self.chunks {
                if chunk.start > t {
                    break;
                }
                let index = usize::try_from(t - chunk.start).unwrap_or(usize::MAX);
                if let Some(sample) = chunk.samples.get(index) {
                    value += sample;
                }
            }

            frame.fill(value.clamp(-1.0, 1.0));
        }

        let end = start + (out.len() / channels) as u64;
        self.chunks.retain(|chunk| chunk.end() > end);
    }
}

/// State shared with the output callback thread
#[derive(Debug, Default)]
struct PlaybackShared {
    clock: AtomicU64,
    timeline: Mutex<Timeline>,
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    stream: Option<Stream>,
    shared: Arc<PlaybackShared>,
}

impl AudioPlayback {
    /// Open the default output device at 24kHz and start rendering silence
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE))
            .config();
        let channels = usize::from(config.channels);

        let shared = Arc::new(PlaybackShared::default());
        let callback_shared = Arc::clone(&shared);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let start = callback_shared.clock.load(Ordering::Acquire);
                    callback_shared
                        .timeline
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .render(start, data, channels);
                    callback_shared
                        .clock
                        .store(start + (data.len() / channels) as u64, Ordering::Release);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = OUTPUT_SAMPLE_RATE,
            channels,
            "audio playback initialized"
        );

        Ok(Self {
            stream: Some(stream),
            shared,
        })
    }

    fn timeline(&self) -> std::sync::MutexGuard<'_, Timeline> {
        self.shared
            .timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioOutput for AudioPlayback {
    fn sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE
    }

    fn now(&self) -> u64 {
        self.shared.clock.load(Ordering::Acquire)
    }

    fn schedule(&mut self, start_at: u64, samples: Vec<f32>) {
        if self.stream.is_none() {
            return;
        }
        self.timeline().insert(start_at, samples);
    }

    fn flush(&mut self, now: u64) {
        self.timeline().flush(now);
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.timeline().chunks.clear();
            tracing::debug!("audio playback stopped");
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_renders_silence_before_start() {
        let mut timeline = Timeline::default();
        timeline.insert(2, vec![0.5, 0.5]);

        let mut out = [1.0f32; 4];
        timeline.render(0, &mut out, 1);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.5]);
        assert!(timeline.chunks.is_empty());
    }

    #[test]
    fn test_timeline_back_to_back_chunks() {
        let mut timeline = Timeline::default();
        timeline.insert(0, vec![0.1, 0.2]);
        timeline.insert(2, vec![0.3, 0.4]);

        let mut out = [0.0f32; 4];
        timeline.render(0, &mut out, 1);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_timeline_duplicates_mono_to_stereo() {
        let mut timeline = Timeline::default();
        timeline.insert(0, vec![0.25, -0.25]);

        let mut out = [0.0f32; 4];
        timeline.render(0, &mut out, 2);
        assert_eq!(out, [0.25, 0.25, -0.25, -0.25]);
    }

    #[test]
    fn test_timeline_keeps_partially_played_chunk() {
        let mut timeline = Timeline::default();
        timeline.insert(0, vec![0.5; 6]);

        let mut out = [0.0f32; 4];
        timeline.render(0, &mut out, 1);
        assert_eq!(timeline.chunks.len(), 1);

        timeline.render(4, &mut out, 1);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
        assert!(timeline.chunks.is_empty());
    }

    #[test]
    fn test_timeline_flush_spares_playing_chunk() {
        let mut timeline = Timeline::default();
        timeline.insert(0, vec![0.5; 4]);
        timeline.insert(4, vec![0.5; 4]);

        timeline.flush(2);
        assert_eq!(timeline.chunks.len(), 1);
        assert_eq!(timeline.chunks[0].start, 0);
    }

    #[test]
    fn test_timeline_clamps_overlap() {
        let mut timeline = Timeline::default();
        timeline.insert(0, vec![0.75; 2]);
        timeline.insert(0, vec![0.75; 2]);

        let mut out = [0.0f32; 2];
        timeline.render(0, &mut out, 1);
        assert_eq!(out, [1.0, 1.0]);
    }

    #[test]
    fn test_duration_to_frames() {
        assert_eq!(duration_to_frames(Duration::from_millis(100), 24_000), 2_400);
        assert_eq!(duration_to_frames(Duration::ZERO, 24_000), 0);
    }
}
