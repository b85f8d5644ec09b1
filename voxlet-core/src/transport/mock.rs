//! Scripted transport for tests and offline development
//!
//! Clones share state: keep one handle in the test, hand the other to the
//! session, then inject inbound events and inspect what was sent.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::provider::{AudioSink, InboundStream, RealtimeTransport};
use super::types::{ConnectRequest, InboundEvent};
use crate::audio::pcm::PcmChunk;

/// Behavior for the mock transport
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MockTransportBehavior {
    /// Connect succeeds and the channel stays open
    #[default]
    Open,
    /// Connect rejects with the given message
    ConnectError { message: String },
}

#[derive(Default)]
struct MockState {
    behavior: MockTransportBehavior,
    sent: Vec<PcmChunk>,
    last_request: Option<ConnectRequest>,
    inbound_tx: Option<mpsc::Sender<InboundEvent>>,
    queued: Vec<InboundEvent>,
    connects: usize,
}

/// In-memory [`RealtimeTransport`] with scripted behavior.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(behavior: MockTransportBehavior) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().behavior = behavior;
        transport
    }

    pub fn set_behavior(&self, behavior: MockTransportBehavior) {
        self.state.lock().unwrap().behavior = behavior;
    }

    /// All outbound chunks recorded so far, in send order.
    pub fn sent_chunks(&self) -> Vec<PcmChunk> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.state.lock().unwrap().last_request.clone()
    }

    /// Deliver an inbound event as if the endpoint sent it. Events injected
    /// before connect are queued and flushed on connect.
    pub fn inject(&self, event: InboundEvent) {
        let mut state = self.state.lock().unwrap();
        match &state.inbound_tx {
            Some(tx) => {
                if tx.try_send(event).is_err() {
                    tracing::warn!("mock inbound channel full or closed, dropping event");
                }
            }
            None => state.queued.push(event),
        }
    }
}

#[async_trait]
impl RealtimeTransport for MockTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<(AudioSink, InboundStream)> {
        let (out_tx, mut out_rx) = mpsc::channel::<PcmChunk>(32);
        let (in_tx, in_rx) = mpsc::channel::<InboundEvent>(64);

        {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            state.last_request = Some(request);

            if let MockTransportBehavior::ConnectError { message } = &state.behavior {
                anyhow::bail!("{message}");
            }

            for event in state.queued.drain(..) {
                let _ = in_tx.try_send(event);
            }
            state.inbound_tx = Some(in_tx);
        }

        let recorder = self.state.clone();
        tokio::spawn(async move {
            while let Some(chunk) = out_rx.recv().await {
                recorder.lock().unwrap().sent.push(chunk);
            }
        });

        Ok((AudioSink::new(out_tx), InboundStream::new(in_rx)))
    }
}
