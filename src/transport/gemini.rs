//! Gemini Live websocket adapter
//!
//! Speaks the `BidiGenerateContent` protocol: a `setup` message on connect,
//! `realtimeInput` media chunks outbound, `serverContent` inbound. Server
//! frames carry JSON in either text or binary websocket messages.

use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Connector, EventSender, InboundMessage, OutboundQueue, Transport, TransportEvent};
use crate::config::LiveConfig;
use crate::voice::EncodedPacket;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSource = SplitStream<WsStream>;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: String,
    generation_config: GenerationConfig<'a>,
    system_instruction: TextContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoice<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoice<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [MediaChunk<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

/// A decoded server frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Setup acknowledged; the session may stream
    SetupComplete,
    /// Audio and/or control flags
    Content(InboundMessage),
    /// Server is about to disconnect
    GoAway,
    /// Anything this client does not act on
    Other,
}

/// Build the initial `setup` message
///
/// # Errors
///
/// Returns error if serialization fails
pub fn setup_json(config: &LiveConfig) -> Result<String> {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    let message = SetupMessage {
        setup: Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: ["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoice {
                            voice_name: &config.voice_name,
                        },
                    },
                },
            },
            system_instruction: TextContent {
                parts: [TextPart {
                    text: &config.system_instruction,
                }],
            },
        },
    };

    Ok(serde_json::to_string(&message)?)
}

/// Wrap one packet as a `realtimeInput` message
///
/// # Errors
///
/// Returns error if serialization fails
pub fn realtime_input_json(packet: &EncodedPacket) -> Result<String> {
    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [MediaChunk {
                mime_type: &packet.mime_type,
                data: &packet.data,
            }],
        },
    };
    Ok(serde_json::to_string(&message)?)
}

/// Decode one server frame
///
/// Only the first audio part of a model turn is taken.
///
/// # Errors
///
/// Returns `Serialization` if the frame is not JSON
pub fn parse_server_message(bytes: &[u8]) -> Result<ServerEvent> {
    let message: ServerMessage = serde_json::from_slice(bytes)?;

    if message.setup_complete.is_some() {
        return Ok(ServerEvent::SetupComplete);
    }

    if let Some(content) = message.server_content {
        let audio = content
            .model_turn
            .into_iter()
            .flat_map(|turn| turn.parts)
            .filter_map(|part| part.inline_data)
            .find(|blob| blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/"))
            .map(|blob| EncodedPacket {
                data: blob.data,
                mime_type: blob.mime_type,
            });

        return Ok(ServerEvent::Content(InboundMessage {
            audio,
            interrupted: content.interrupted,
            turn_complete: content.turn_complete,
        }));
    }

    if message.go_away.is_some() {
        return Ok(ServerEvent::GoAway);
    }

    Ok(ServerEvent::Other)
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens Gemini Live sessions
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    config: LiveConfig,
    queue_capacity: usize,
    /// Writer tasks still flushing their queue or close frame
    writers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl GeminiLiveConnector {
    #[must_use]
    pub fn new(config: LiveConfig, queue_capacity: usize) -> Self {
        Self {
            config,
            queue_capacity,
            writers: Arc::default(),
        }
    }

    fn track_writer(&self, writer: JoinHandle<()>) {
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        writers.retain(|w| !w.is_finished());
        writers.push(writer);
    }

    /// Writer tasks not yet finished
    #[must_use]
    pub fn pending_writers(&self) -> usize {
        self.writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| !w.is_finished())
            .count()
    }

    /// Wait up to `timeout` for closed transports to send their close frame
    ///
    /// Writers still running at the deadline are left detached.
    pub async fn drain(&self, timeout: Duration) {
        let writers = std::mem::take(
            &mut *self.writers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if writers.is_empty() {
            return;
        }

        let count = writers.len();
        if tokio::time::timeout(timeout, futures::future::join_all(writers))
            .await
            .is_err()
        {
            tracing::warn!(count, ?timeout, "live websocket writers did not finish");
        } else {
            tracing::debug!(count, "live websocket writers finished");
        }
    }
}

#[async_trait]
impl Connector for GeminiLiveConnector {
    async fn connect(&self, events: EventSender) -> Result<Box<dyn Transport>> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .ok_or_else(|| Error::Config("GEMINI_API_KEY is not set".to_string()))?;

        tracing::info!(
            endpoint = %self.config.endpoint,
            model = %self.config.model,
            voice = %self.config.voice_name,
            "connecting to live model"
        );

        let url = format!("{}?key={api_key}", self.config.endpoint);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let (mut writer, reader) = ws_stream.split();

        writer
            .send(Message::Text(setup_json(&self.config)?))
            .await
            .map_err(|e| Error::Transport(format!("failed to send setup: {e}")))?;

        let queue = Arc::new(OutboundQueue::new(self.queue_capacity));
        self.track_writer(tokio::spawn(write_loop(writer, Arc::clone(&queue))));
        let reader_task = tokio::spawn(read_loop(reader, events));

        tracing::debug!("live websocket established, awaiting setup ack");

        Ok(Box::new(GeminiLiveTransport {
            queue,
            reader_task: Some(reader_task),
        }))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Open Gemini Live channel
pub struct GeminiLiveTransport {
    queue: Arc<OutboundQueue>,
    reader_task: Option<JoinHandle<()>>,
}

impl Transport for GeminiLiveTransport {
    fn send(&mut self, packet: EncodedPacket) {
        self.queue.push(packet);
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
            // Writer drains what is queued, then sends a close frame
            self.queue.close();
            tracing::debug!(dropped = self.queue.dropped(), "live transport closed");
        }
    }

    fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

impl Drop for GeminiLiveTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop<S>(mut writer: S, queue: Arc<OutboundQueue>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(packet) = queue.pop().await {
        let text = match realtime_input_json(&packet) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode outbound packet");
                continue;
            }
        };

        if let Err(e) = writer.send(Message::Text(text)).await {
            tracing::warn!(error = %e, "live websocket write failed");
            break;
        }
    }

    let _ = writer.send(Message::Close(None)).await;
    let _ = writer.close().await;
}

async fn read_loop(mut reader: WsSource, events: EventSender) {
    while let Some(frame) = reader.next().await {
        let payload = match frame {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(close)) => {
                if let Some(close) = close.filter(|c| c.code != CloseCode::Normal) {
                    let reason = format!(
                        "closed by server ({}): {}",
                        u16::from(close.code),
                        close.reason
                    );
                    let _ = events.send(TransportEvent::Error(reason));
                }
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                break;
            }
        };

        match parse_server_message(&payload) {
            Ok(ServerEvent::SetupComplete) => {
                tracing::debug!("live setup complete");
                let _ = events.send(TransportEvent::Open);
            }
            Ok(ServerEvent::Content(message)) => {
                let _ = events.send(TransportEvent::Message(message));
            }
            Ok(ServerEvent::GoAway) => {
                tracing::warn!("live server sent goAway");
            }
            Ok(ServerEvent::Other) => {}
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unparseable server frame");
            }
        }
    }

    let _ = events.send(TransportEvent::Close);
}
