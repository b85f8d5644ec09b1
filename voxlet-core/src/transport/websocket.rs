//! JSON-over-WebSocket rendering of the duplex transport contract

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, tungstenite::client::IntoClientRequest};

use super::provider::{AudioSink, InboundStream, RealtimeTransport};
use super::types::{ConnectRequest, InboundEvent};
use crate::audio::pcm::{self, AudioFormat, PcmChunk};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WebSocketTransportConfig {
    pub url: String,
    pub api_key: Option<String>,
}

/// Duplex transport over a WebSocket speaking newline-free JSON messages.
pub struct WebSocketTransport {
    config: WebSocketTransportConfig,
}

impl WebSocketTransport {
    pub fn new(config: WebSocketTransportConfig) -> Self {
        Self { config }
    }
}

#[derive(Serialize)]
struct SessionStart<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    input_format: String,
    output_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<&'a str>,
}

#[derive(Serialize)]
struct OutboundAudio {
    #[serde(rename = "type")]
    kind: &'static str,
    audio: String,
    mime_type: String,
}

#[derive(Deserialize)]
struct ServerMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn parse_server_message(msg: ServerMessage, output_format: AudioFormat) -> Option<InboundEvent> {
    match msg.kind.as_str() {
        "response.audio.delta" => {
            let audio = msg.audio?;
            match pcm::decode_transport(&audio) {
                Ok(data) => Some(InboundEvent::AudioDelta(PcmChunk::new(data, output_format))),
                Err(e) => {
                    // Malformed chunk: drop it and keep the session alive.
                    tracing::warn!(error = %e, "dropping undecodable audio delta");
                    None
                }
            }
        }
        "response.interrupted" => Some(InboundEvent::Interrupted),
        "session.closed" => Some(InboundEvent::Closed),
        "error" => {
            let message = msg.message.unwrap_or_else(|| "unknown error".into());
            Some(InboundEvent::Error(message))
        }
        _ => None,
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<(AudioSink, InboundStream)> {
        let mut ws_request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .context("failed to build websocket request")?;
        if let Some(api_key) = &self.config.api_key {
            ws_request.headers_mut().insert(
                "authorization",
                format!("Bearer {api_key}")
                    .parse()
                    .context("api key is not a valid header value")?,
            );
        }

        let (ws_stream, _) = connect_async(ws_request)
            .await
            .context("failed to connect to realtime endpoint")?;
        let (mut write, mut read) = ws_stream.split();

        let setup = SessionStart {
            kind: "session.start",
            input_format: request.input_format.to_string(),
            output_format: request.output_format.to_string(),
            voice: request.voice_profile.as_deref(),
            system_instruction: request.system_instruction.as_deref(),
        };
        let setup_json = serde_json::to_string(&setup).expect("session.start serializes");
        write
            .send(Message::Text(setup_json))
            .await
            .context("failed to send session.start")?;

        tokio::time::timeout(HANDSHAKE_TIMEOUT, await_session_ack(&mut read))
            .await
            .context("timed out waiting for session.started")??;

        let input_format = request.input_format;
        let output_format = request.output_format;

        let (audio_tx, mut audio_rx) = mpsc::channel::<PcmChunk>(32);
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(64);

        tokio::spawn(async move {
            while let Some(chunk) = audio_rx.recv().await {
                let outbound = OutboundAudio {
                    kind: "input_audio.append",
                    audio: pcm::encode_transport(&chunk.data),
                    mime_type: input_format.to_string(),
                };
                let json = serde_json::to_string(&outbound).expect("outbound audio serializes");
                if let Err(e) = write.send(Message::Text(json)).await {
                    tracing::error!(error = ?e, "failed to send audio over websocket");
                    break;
                }
            }
            // Outbound handle dropped: close the socket politely.
            let _ = write.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                let msg = match msg_result {
                    Ok(msg) => msg,
                    Err(e) => {
                        let _ = inbound_tx.send(InboundEvent::Error(format!("{e:?}"))).await;
                        break;
                    }
                };

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => {
                        let _ = inbound_tx.send(InboundEvent::Closed).await;
                        break;
                    }
                    _ => continue,
                };

                let server_msg = match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(server_msg) => server_msg,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping unparseable server message");
                        continue;
                    }
                };

                let Some(event) = parse_server_message(server_msg, output_format) else {
                    continue;
                };
                let ends_session =
                    matches!(event, InboundEvent::Closed | InboundEvent::Error(_));
                if inbound_tx.send(event).await.is_err() {
                    break;
                }
                if ends_session {
                    break;
                }
            }
        });

        Ok((AudioSink::new(audio_tx), InboundStream::new(inbound_rx)))
    }
}

async fn await_session_ack<S>(read: &mut S) -> Result<()>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        let msg = msg.context("websocket failed during handshake")?;
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => anyhow::bail!("endpoint closed during handshake"),
            _ => continue,
        };
        let server_msg: ServerMessage =
            serde_json::from_str(&text).context("unparseable handshake message")?;
        match server_msg.kind.as_str() {
            "session.started" => return Ok(()),
            "error" => anyhow::bail!(
                "endpoint rejected session: {}",
                server_msg.message.unwrap_or_else(|| "unknown error".into())
            ),
            _ => continue,
        }
    }
    anyhow::bail!("websocket ended before session.started")
}
