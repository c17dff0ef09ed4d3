use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use live_voice::voice::{
    AudioInput, DecodedChunk, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, PlaybackScheduler,
};
use live_voice::{
    AudioBackend, Config, Control, CpalBackend, GeminiLiveConnector, SessionStatus, VoiceSession,
    run_session,
};

/// Live Voice - talk to a streaming speech model in real time
#[derive(Parser)]
#[command(name = "live-voice", version, about)]
struct Cli {
    /// Live model to use
    #[arg(long, env = "LIVE_VOICE_MODEL")]
    model: Option<String>,

    /// Prebuilt voice for the model's replies
    #[arg(long, env = "LIVE_VOICE_VOICE")]
    voice: Option<String>,

    /// Start with the microphone muted
    #[arg(long)]
    muted: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input through the capture pipeline
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,live_voice=info",
        1 => "info,live_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Command::TestMic { duration }) => return test_mic(duration).await,
        Some(Command::TestSpeaker) => return test_speaker().await,
        None => {}
    }

    let mut config = Config::load()?;
    if let Some(model) = cli.model {
        config.live.model = model;
    }
    if let Some(voice) = cli.voice {
        config.live.voice_name = voice;
    }
    tracing::debug!(?config, "loaded configuration");

    if config.live.api_key.is_none() {
        anyhow::bail!("no API key configured (set GEMINI_API_KEY)");
    }

    let connector =
        GeminiLiveConnector::new(config.live.clone(), config.session.outbound_queue_capacity);
    let mut session = VoiceSession::new(config.session.clone());
    session.set_muted(cli.muted);

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    spawn_stdin_controls(control_tx.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = control_tx.send(Control::Close);
        }
    });

    let mut status_rx = session.subscribe();
    let printer = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow_and_update();
            println!("{status}");
        }
    });

    println!("Live voice mode (native audio)");
    println!("Type 'm' + Enter to toggle mute, 'q' + Enter to quit\n");

    let stats = run_session(&mut session, &CpalBackend, &connector, control_rx).await;
    let status = session.status();

    // Let the websocket writer send its close frame before the runtime exits
    connector.drain(Duration::from_secs(1)).await;

    // Dropping the session closes the status channel and ends the printer
    drop(session);
    let _ = printer.await;

    println!(
        "\nframes sent: {} | muted: {} | chunks played: {} | dropped in: {} | dropped out: {}",
        stats.frames_sent,
        stats.frames_muted,
        stats.chunks_scheduled,
        stats.malformed_dropped,
        stats.outbound_dropped
    );

    if let SessionStatus::Error(reason) = status {
        anyhow::bail!("session ended: {}", reason.label());
    }

    Ok(())
}

/// Map stdin lines to session controls
///
/// Reads on a plain thread; a pending read must not hold up runtime shutdown.
fn spawn_stdin_controls(control: mpsc::UnboundedSender<Control>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            match parse_control(&line) {
                Ok(Some(command)) => {
                    if control.send(command).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(other) => println!("unknown command: {other} (m = toggle mute, q = quit)"),
            }
        }
    });
}

/// Parse one stdin line; blank lines map to `None`
fn parse_control(line: &str) -> Result<Option<Control>, &str> {
    match line.trim() {
        "m" | "mute" => Ok(Some(Control::ToggleMute)),
        "q" | "quit" | "exit" => Ok(Some(Control::Close)),
        "" => Ok(None),
        other => Err(other),
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = CpalBackend.open_input()?;
    let (frame_tx, mut frames) = mpsc::unbounded_channel();
    capture.start(frame_tx)?;

    println!("Sample rate: {INPUT_SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        let mut frame_count = 0;
        while let Ok(frame) = frames.try_recv() {
            samples.extend_from_slice(frame.samples());
            frame_count += 1;
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] frames: {frame_count} | RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]",
            i + 1
        );
    }

    capture.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave split into back-to-back chunks
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a continuous 440Hz tone for 2 seconds\n");

    let mut playback = PlaybackScheduler::new(CpalBackend.open_output()?);

    let frequency = 440.0_f32;
    let chunk_samples = OUTPUT_SAMPLE_RATE as usize / 2;

    #[allow(clippy::cast_precision_loss)]
    let tone: Vec<f32> = (0..chunk_samples * 4)
        .map(|i| {
            let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    for chunk in tone.chunks(chunk_samples) {
        let start = playback.schedule(DecodedChunk::new(chunk.to_vec(), OUTPUT_SAMPLE_RATE));
        println!("Scheduled {} samples at frame {start}", chunk.len());
    }

    // Wait for the device clock to pass the cursor
    let deadline = tokio::time::Instant::now() + playback.backlog() + Duration::from_secs(1);
    while !playback.is_caught_up(Duration::ZERO) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    playback.close();

    println!("\n---");
    println!("If you heard one unbroken tone, gapless playback is working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
