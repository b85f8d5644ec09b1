use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ConnectRequest, InboundEvent};
use crate::audio::pcm::PcmChunk;

/// Trait for duplex realtime channels to the remote endpoint.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open the channel.
    ///
    /// Resolves once the endpoint has acknowledged the session, returning
    /// two independent handles:
    /// - [`AudioSink`]: for sending microphone audio
    /// - [`InboundStream`]: for receiving endpoint events
    async fn connect(&self, request: ConnectRequest) -> Result<(AudioSink, InboundStream)>;
}

/// Handle for sending audio to the endpoint. Fire-and-forget; dropping it
/// closes the outbound direction.
pub struct AudioSink {
    sender: mpsc::Sender<PcmChunk>,
}

impl AudioSink {
    pub fn new(sender: mpsc::Sender<PcmChunk>) -> Self {
        Self { sender }
    }

    /// Send one outbound chunk, in capture order.
    pub async fn send(&self, chunk: PcmChunk) -> Result<()> {
        self.sender
            .send(chunk)
            .await
            .context("outbound audio channel closed")?;
        Ok(())
    }
}

/// Handle for receiving endpoint events, in arrival order.
pub struct InboundStream {
    receiver: mpsc::Receiver<InboundEvent>,
}

impl InboundStream {
    pub fn new(receiver: mpsc::Receiver<InboundEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event. Returns None when the channel ends.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.receiver.recv().await
    }
}
