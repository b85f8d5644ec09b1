use serde::{Deserialize, Serialize};

use crate::audio::pcm::{AudioFormat, PcmChunk};

/// Parameters for opening a duplex channel to the remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub input_format: AudioFormat,
    pub output_format: AudioFormat,
    pub voice_profile: Option<String>,
    pub system_instruction: Option<String>,
}

/// Messages arriving from the remote endpoint.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// A chunk of synthesized speech to schedule for playback.
    AudioDelta(PcmChunk),
    /// Barge-in: the user spoke over the agent; stop all playback now.
    Interrupted,
    /// The endpoint closed the channel cleanly.
    Closed,
    /// The channel failed; the session must close.
    Error(String),
}
