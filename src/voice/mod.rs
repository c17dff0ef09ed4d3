//! Voice processing module
//!
//! Handles the audio side of a live session: the PCM codec, microphone
//! capture framed for transmission, and gapless playback scheduling.

mod capture;
mod device;
pub mod pcm;
mod playback;

pub use capture::{AudioCapture, CapturePipeline, FrameAssembler};
pub use device::{AudioBackend, AudioInput, AudioOutput, CpalBackend, FrameSender};
pub use pcm::{AudioFrame, DecodedChunk, EncodedPacket};
pub use playback::{AudioPlayback, PlaybackScheduler};

/// Sample rate for microphone capture (16kHz for speech)
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized audio from the model
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per captured frame (~256ms at 16kHz)
pub const FRAME_SIZE: usize = 4096;

/// Format tag attached to every outbound packet
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";
