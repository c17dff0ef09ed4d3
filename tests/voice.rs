//! Voice pipeline integration tests
//!
//! Tests codec, framing and playback scheduling without audio hardware

use std::sync::atomic::Ordering;
use std::time::Duration;

use live_voice::voice::pcm::{decode, decode_base64, encode};
use live_voice::voice::{
    AudioBackend, DecodedChunk, EncodedPacket, FRAME_SIZE, FrameAssembler, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE, PlaybackScheduler,
};

mod common;

use common::{FakeBackend, generate_sine_samples, model_audio};

/// Generate silence
fn generate_silence(sample_rate: u32, duration_secs: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

fn scheduler(backend: &FakeBackend) -> PlaybackScheduler {
    PlaybackScheduler::new(backend.open_output().unwrap())
}

#[test]
fn test_pcm_sine_survives_codec() {
    let samples = generate_sine_samples(440.0, INPUT_SAMPLE_RATE, 0.1, 0.8);
    let bytes = encode(&samples);
    assert_eq!(bytes.len(), samples.len() * 2);

    let decoded = decode(&bytes).unwrap();
    assert_eq!(decoded.len(), samples.len());
    for (original, restored) in samples.iter().zip(&decoded) {
        assert!((original - restored).abs() <= 1.0 / 32768.0);
    }
}

#[test]
fn test_pcm_full_scale_clamps() {
    let bytes = encode(&[1.0, -1.0, 2.0, -2.0]);
    let decoded = decode(&bytes).unwrap();

    assert_eq!(decoded[0], 32767.0 / 32768.0);
    assert_eq!(decoded[1], -1.0);
    assert_eq!(decoded[2], 32767.0 / 32768.0);
    assert_eq!(decoded[3], -1.0);
}

#[test]
fn test_pcm_silence_is_zero_bytes() {
    let bytes = encode(&generate_silence(INPUT_SAMPLE_RATE, 0.01));
    assert!(bytes.iter().all(|b| *b == 0));
}

#[test]
fn test_frame_packet_is_tagged_for_input_rate() {
    let mut assembler = FrameAssembler::default();
    let frames = assembler.push(&generate_sine_samples(300.0, INPUT_SAMPLE_RATE, 0.3, 0.5));
    assert_eq!(frames.len(), 1);

    let packet = EncodedPacket::from_frame(&frames[0]);
    assert_eq!(packet.mime_type, "audio/pcm;rate=16000");
    assert_eq!(decode_base64(&packet.data).unwrap().len(), FRAME_SIZE * 2);
}

#[test]
fn test_assembler_emits_full_frames_only() {
    let mut assembler = FrameAssembler::default();

    // One second at 16kHz is three full frames with a remainder
    let frames = assembler.push(&generate_silence(INPUT_SAMPLE_RATE, 1.0));
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.len() == FRAME_SIZE));
    assert_eq!(assembler.pending(), 16_000 - 3 * FRAME_SIZE);

    // Uneven device callbacks still line up
    let mut assembler = FrameAssembler::new(4);
    let mut total = Vec::new();
    let blocks: [&[f32]; 3] = [&[1.0], &[2.0, 3.0, 4.0, 5.0, 6.0], &[7.0, 8.0]];
    for block in blocks {
        total.extend(assembler.push(block));
    }
    assert_eq!(total.len(), 2);
    assert_eq!(total[0].samples(), &[1.0, 2.0, 3.0, 4.0]);
    assert_eq!(total[1].samples(), &[5.0, 6.0, 7.0, 8.0]);
    assert_eq!(assembler.pending(), 0);
}

#[test]
fn test_decoded_chunk_duration() {
    let samples = generate_sine_samples(440.0, OUTPUT_SAMPLE_RATE, 0.5, 0.3);
    let chunk = DecodedChunk::from_packet(&model_audio(&samples)).unwrap();

    assert_eq!(chunk.sample_rate(), OUTPUT_SAMPLE_RATE);
    assert_eq!(chunk.frames(), 12_000);
    assert_eq!(chunk.duration(), Duration::from_millis(500));
}

#[test]
fn test_scheduler_gapless_start_times() {
    let backend = FakeBackend::default();
    let mut playback = scheduler(&backend);

    let starts: Vec<u64> = (0..4)
        .map(|_| {
            let samples = generate_sine_samples(440.0, OUTPUT_SAMPLE_RATE, 0.25, 0.3);
            playback.schedule(DecodedChunk::new(samples, OUTPUT_SAMPLE_RATE))
        })
        .collect();

    assert_eq!(starts, [0, 6_000, 12_000, 18_000]);
    assert_eq!(playback.cursor(), 24_000);
    assert_eq!(playback.backlog(), Duration::from_secs(1));
}

#[test]
fn test_scheduler_never_starts_in_the_past() {
    let backend = FakeBackend::default();
    let mut playback = scheduler(&backend);

    playback.schedule(DecodedChunk::new(vec![0.1; 2_400], OUTPUT_SAMPLE_RATE));
    backend.clock.store(50_000, Ordering::SeqCst);

    let start = playback.schedule(DecodedChunk::new(vec![0.1; 2_400], OUTPUT_SAMPLE_RATE));
    assert_eq!(start, 50_000);
    assert_eq!(playback.cursor(), 52_400);
}

#[test]
fn test_scheduler_interrupt_resets_cursor() {
    let backend = FakeBackend::default();
    let mut playback = scheduler(&backend);

    for _ in 0..3 {
        playback.schedule(DecodedChunk::new(vec![0.1; 12_000], OUTPUT_SAMPLE_RATE));
    }
    backend.advance(7_000);

    playback.interrupt();
    assert_eq!(playback.cursor(), 7_000);
    assert!(playback.cursor() >= playback.now());
    assert_eq!(backend.output.flushed(), 1);
    assert_eq!(playback.backlog(), Duration::ZERO);
}

#[test]
fn test_scheduler_caught_up_with_slack() {
    let backend = FakeBackend::default();
    let mut playback = scheduler(&backend);
    let slack = Duration::from_millis(100);

    assert!(playback.is_caught_up(slack));

    playback.schedule(DecodedChunk::new(vec![0.1; 12_000], OUTPUT_SAMPLE_RATE));
    assert!(!playback.is_caught_up(slack));

    backend.advance(9_599);
    assert!(!playback.is_caught_up(slack));

    backend.advance(1);
    assert!(playback.is_caught_up(slack));
}

#[test]
fn test_scheduler_close_is_idempotent() {
    let backend = FakeBackend::default();
    let mut playback = scheduler(&backend);

    playback.close();
    playback.close();
    assert_eq!(backend.output.closed(), 1);
}
