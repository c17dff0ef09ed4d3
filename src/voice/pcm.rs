//! PCM16 codec and transport-safe text encoding
//!
//! Samples travel as signed 16-bit little-endian integers wrapped in base64.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{INPUT_MIME_TYPE, OUTPUT_SAMPLE_RATE};
use crate::{Error, Result};

/// Scale between normalized float samples and PCM16
const PCM_SCALE: f32 = 32768.0;

/// A fixed-size block of captured mono samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    /// Wrap captured samples
    #[must_use]
    pub const fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Transport-safe encoding of one audio block plus its format tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    /// Base64 of the PCM16 bytes
    pub data: String,
    /// Format tag, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl EncodedPacket {
    /// Encode a captured frame for sending
    #[must_use]
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            data: encode_base64(&encode(frame.samples())),
            mime_type: INPUT_MIME_TYPE.to_string(),
        }
    }
}

/// Float samples reconstructed from an inbound packet
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl DecodedChunk {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode an inbound packet at the output sample rate
    ///
    /// # Errors
    ///
    /// Returns `MalformedAudio` if the payload is not valid base64 PCM16
    pub fn from_packet(packet: &EncodedPacket) -> Result<Self> {
        let bytes = decode_base64(&packet.data)?;
        let sample_rate = rate_from_mime(&packet.mime_type).unwrap_or(OUTPUT_SAMPLE_RATE);
        Ok(Self::new(decode(&bytes)?, sample_rate))
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sample frames (mono)
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.samples.len() as u64
    }

    /// Playback duration derived from sample count and rate
    #[must_use]
    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frames(), self.sample_rate)
    }
}

/// Convert a frame count at `sample_rate` to wall time
#[must_use]
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let rate = u64::from(sample_rate);
    let secs = frames / rate;
    let rem = frames % rate;
    // rem < rate <= u32::MAX, so the nanos fit comfortably
    #[allow(clippy::cast_possible_truncation)]
    let nanos = (rem * 1_000_000_000 / rate) as u32;
    Duration::new(secs, nanos)
}

/// Quantize float samples to PCM16 little-endian bytes
#[must_use]
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * PCM_SCALE).clamp(-PCM_SCALE, PCM_SCALE - 1.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Expand PCM16 little-endian bytes to float samples
///
/// # Errors
///
/// Returns `MalformedAudio` if the buffer length is odd
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::MalformedAudio(format!(
            "pcm16 buffer has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM_SCALE)
        .collect())
}

/// Base64-encode raw bytes
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64 text back to raw bytes
///
/// # Errors
///
/// Returns `MalformedAudio` if the text is not valid base64
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| Error::MalformedAudio(format!("invalid base64: {e}")))
}

/// Pull the `rate=` parameter out of a MIME-like tag
fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}
