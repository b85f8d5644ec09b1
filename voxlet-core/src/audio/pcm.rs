//! PCM16 conversion and transport framing
//!
//! Fixed-format only: 16-bit signed little-endian mono, base64 on the wire.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DecodeError;

/// Wire-level format tag for a PCM chunk, e.g. `pcm;rate=16000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AudioFormat {
    pub sample_rate: u32,
}

impl AudioFormat {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn parse(tag: &str) -> Result<Self, DecodeError> {
        let rate = tag
            .strip_prefix("pcm;rate=")
            .and_then(|r| r.parse::<u32>().ok())
            .ok_or_else(|| DecodeError::BadFormatTag(tag.to_string()))?;
        Ok(Self { sample_rate: rate })
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pcm;rate={}", self.sample_rate)
    }
}

impl TryFrom<String> for AudioFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).map_err(|e| e.to_string())
    }
}

impl From<AudioFormat> for String {
    fn from(value: AudioFormat) -> Self {
        value.to_string()
    }
}

/// An immutable buffer of 16-bit little-endian samples plus its format tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmChunk {
    pub data: Vec<u8>,
    pub format: AudioFormat,
}

impl PcmChunk {
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self { data, format }
    }

    /// Number of 16-bit samples in the buffer (trailing odd byte excluded).
    pub fn frame_count(&self) -> usize {
        self.data.len() / 2
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.format.sample_rate as f64
    }
}

/// Convert f32 samples in [-1, 1] to i16 little-endian bytes.
///
/// Out-of-range input clips to the i16 range rather than wrapping.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample as f64 * 32768.0).round();
        let clipped = scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        bytes.extend_from_slice(&clipped.to_le_bytes());
    }
    bytes
}

/// Convert i16 little-endian bytes back to f32 samples scaled by 1/32768.
pub fn pcm16_to_float(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sample as f32 / 32768.0
        })
        .collect())
}

/// Base64 framing for sending raw bytes over a text channel.
pub fn encode_transport(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Inverse of [`encode_transport`].
pub fn decode_transport(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}
