//! Gapless playback scheduling over a [`PlaybackSink`]
//!
//! Owns the two pieces of shared session state from the concurrency model:
//! the next-playback-start offset and the active source set. Both are only
//! touched from the session task, which is the single point of
//! serialization per session.

use std::collections::HashMap;

use crate::audio::pcm::{self, AudioFormat, PcmChunk};
use crate::audio::playback::{PlaybackSink, ScheduledSource};
use crate::error::DecodeError;

/// Schedules inbound chunks back-to-back on the output device.
///
/// Successive sources never overlap: each is scheduled at
/// `max(next_start, sink.now())`, and `next_start` advances by the audible
/// duration. A chunk arriving late simply starts at the device clock, which
/// leaves a gap but keeps arrival order.
pub struct PlaybackScheduler {
    format: AudioFormat,
    rate: f64,
    next_start: f64,
    active: HashMap<u64, f64>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(output_sample_rate: u32, playback_rate: f64) -> Self {
        Self {
            format: AudioFormat::new(output_sample_rate),
            rate: playback_rate,
            next_start: 0.0,
            active: HashMap::new(),
            next_id: 0,
        }
    }

    /// Decode one inbound chunk and schedule it for gapless playback.
    ///
    /// Returns true when this chunk started playback from idle (the
    /// speaking indicator should turn on). A malformed chunk is an error
    /// for the caller to log and drop; the scheduler state is unchanged.
    pub fn handle_chunk(
        &mut self,
        chunk: &PcmChunk,
        sink: &mut dyn PlaybackSink,
    ) -> Result<bool, DecodeError> {
        if chunk.format != self.format {
            return Err(DecodeError::UnexpectedFormat {
                got: chunk.format.to_string(),
                expected: self.format.to_string(),
            });
        }
        let samples = pcm::pcm16_to_float(&chunk.data)?;
        let duration = samples.len() as f64 / self.format.sample_rate as f64;

        let start_at = self.next_start.max(sink.now());
        let id = self.next_id;
        self.next_id += 1;

        let was_idle = self.active.is_empty();
        self.active.insert(id, start_at);
        self.next_start = start_at + duration / self.rate;

        tracing::debug!(
            source_id = id,
            start_at,
            duration,
            next_start = self.next_start,
            "scheduled playback source"
        );

        if let Err(e) = sink.schedule(ScheduledSource {
            id,
            samples,
            sample_rate: self.format.sample_rate,
            start_at,
            rate: self.rate,
        }) {
            tracing::error!(error = ?e, source_id = id, "sink rejected source");
            self.active.remove(&id);
            return Ok(false);
        }

        Ok(was_idle)
    }

    /// A source finished playing. Returns true when the active set drained
    /// and playback is now idle.
    pub fn on_complete(&mut self, id: u64) -> bool {
        if self.active.remove(&id).is_none() {
            // Stopped sources may still race a completion through the sink.
            return false;
        }
        self.active.is_empty()
    }

    /// Server barge-in: stop every active source and reset scheduling.
    ///
    /// Hard cutover. Chunks arriving after this are a fresh playback
    /// stream starting at the device clock.
    pub fn interrupt(&mut self, sink: &mut dyn PlaybackSink) {
        let stopped = self.active.len();
        sink.stop_all();
        self.active.clear();
        self.next_start = 0.0;
        tracing::debug!(stopped, "playback interrupted");
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }
}
