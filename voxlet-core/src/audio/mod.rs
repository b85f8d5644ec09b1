//! Audio capture, conversion, and scheduled playback for voice sessions

pub mod capture;
pub mod pcm;
pub mod playback;
pub mod scheduler;


pub use capture::{CaptureEncoder, CaptureEvent, CaptureSource, FrameStream, MockCaptureSource};
pub use pcm::{AudioFormat, PcmChunk};
pub use playback::{DoneStream, MockPlaybackSink, PlaybackSink, ScheduledSource};
pub use scheduler::PlaybackScheduler;

/// Audio format profile specifying sample rate and channel count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioProfile {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioProfile {
    /// Mono profile at the given rate; both ends of the pipeline are mono.
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}
