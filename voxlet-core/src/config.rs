//! Session configuration

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::audio::pcm::AudioFormat;
use crate::transport::mock::{MockTransport, MockTransportBehavior};
use crate::transport::provider::RealtimeTransport;
use crate::transport::types::ConnectRequest;

/// Per-session settings. Defaults match the remote endpoint's fixed
/// formats: 16 kHz mono in, 24 kHz mono out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_input_rate")]
    pub input_sample_rate: u32,

    #[serde(default = "default_output_rate")]
    pub output_sample_rate: u32,

    /// Playback-rate multiplier applied to synthesized speech.
    #[serde(default = "default_playback_rate")]
    pub playback_rate: f64,

    #[serde(default)]
    pub voice_profile: Option<String>,

    #[serde(default)]
    pub system_instruction: Option<String>,

    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: default_input_rate(),
            output_sample_rate: default_output_rate(),
            playback_rate: default_playback_rate(),
            voice_profile: None,
            system_instruction: None,
            transport: TransportConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn input_format(&self) -> AudioFormat {
        AudioFormat::new(self.input_sample_rate)
    }

    pub fn output_format(&self) -> AudioFormat {
        AudioFormat::new(self.output_sample_rate)
    }

    pub fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            input_format: self.input_format(),
            output_format: self.output_format(),
            voice_profile: self.voice_profile.clone(),
            system_instruction: self.system_instruction.clone(),
        }
    }
}

fn default_input_rate() -> u32 {
    16_000
}

fn default_output_rate() -> u32 {
    24_000
}

fn default_playback_rate() -> f64 {
    1.1
}

/// Which transport implementation a session uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportConfig {
    #[serde(rename = "websocket")]
    WebSocket {
        url: String,
        #[serde(default)]
        api_key: Option<String>,
    },
    #[serde(rename = "mock")]
    Mock {
        #[serde(default)]
        behavior: MockTransportBehavior,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Mock {
            behavior: MockTransportBehavior::default(),
        }
    }
}

/// Initializes the transport described by the config.
pub fn create_transport(config: &TransportConfig) -> Result<Box<dyn RealtimeTransport>> {
    match config {
        #[cfg(feature = "live")]
        TransportConfig::WebSocket { url, api_key } => {
            use crate::transport::websocket::{WebSocketTransport, WebSocketTransportConfig};

            Ok(Box::new(WebSocketTransport::new(WebSocketTransportConfig {
                url: url.clone(),
                api_key: api_key.clone(),
            })))
        }
        #[cfg(not(feature = "live"))]
        TransportConfig::WebSocket { .. } => {
            anyhow::bail!("websocket transport requires the 'live' feature")
        }
        TransportConfig::Mock { behavior } => Ok(Box::new(MockTransport::new(behavior.clone()))),
    }
}
