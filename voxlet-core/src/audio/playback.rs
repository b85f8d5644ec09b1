//! Playback sink boundary: scheduled, independently stoppable output audio
//!
//! The scheduler talks to a [`PlaybackSink`]; the sink owns the output
//! device and its clock. A mock sink with a manual clock ships here so the
//! scheduling invariants can be exercised without audio hardware.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::mpsc;

/// One scheduled unit of output audio.
///
/// `samples` are mono floats at `sample_rate`; `rate` is the playback-rate
/// multiplier, so the audible duration is `samples.len() / sample_rate / rate`.
#[derive(Debug, Clone)]
pub struct ScheduledSource {
    pub id: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub start_at: f64,
    pub rate: f64,
}

impl ScheduledSource {
    /// Audible duration in seconds at the configured playback rate.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64 / self.rate
    }
}

/// Stream of completed source ids, one per finished [`ScheduledSource`].
pub struct DoneStream {
    receiver: mpsc::UnboundedReceiver<u64>,
}

impl DoneStream {
    pub fn new(receiver: mpsc::UnboundedReceiver<u64>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<u64> {
        self.receiver.recv().await
    }
}

/// Output device boundary.
///
/// `now` is the device clock in seconds, monotonic while the sink is open.
/// Completions are delivered through the [`DoneStream`] returned by `open`;
/// a source stopped via `stop_all` does not complete.
pub trait PlaybackSink: Send {
    /// Acquire the output device and start its clock.
    fn open(&mut self) -> Result<DoneStream>;

    fn now(&self) -> f64;

    fn schedule(&mut self, source: ScheduledSource) -> Result<()>;

    /// Hard-stop every scheduled and playing source. No fade, no drain.
    fn stop_all(&mut self);

    /// Release the device. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Record of one `schedule` call on the mock sink.
#[derive(Debug, Clone)]
pub struct ScheduleRecord {
    pub id: u64,
    pub start_at: f64,
    pub duration: f64,
    pub frame_count: usize,
}

#[derive(Default)]
struct MockSinkInner {
    clock: f64,
    pending: Vec<(u64, f64)>,
    scheduled: Vec<ScheduleRecord>,
    stopped: Vec<u64>,
    open_calls: usize,
    close_calls: usize,
    fail_open: Option<String>,
    fail_close: Option<String>,
    done_tx: Option<mpsc::UnboundedSender<u64>>,
}

/// Playback sink with a manually advanced clock.
///
/// Clones share state, so a test can keep one handle while the session owns
/// the other, then drive time with [`MockPlaybackSink::advance`] and inspect
/// what was scheduled or stopped.
#[derive(Clone, Default)]
pub struct MockPlaybackSink {
    inner: Arc<Mutex<MockSinkInner>>,
}

impl MockPlaybackSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose `open` fails, as when no output device exists.
    pub fn unavailable(message: impl Into<String>) -> Self {
        let sink = Self::default();
        sink.inner.lock().unwrap().fail_open = Some(message.into());
        sink
    }

    /// Make the next `close` fail, to exercise the release-error path.
    pub fn fail_close_with(&self, message: impl Into<String>) {
        self.inner.lock().unwrap().fail_close = Some(message.into());
    }

    /// Advance the device clock, completing any source whose end has passed.
    pub fn advance(&self, seconds: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += seconds;
        let clock = inner.clock;
        let mut finished = Vec::new();
        inner.pending.retain(|&(id, end)| {
            if end <= clock {
                finished.push(id);
                false
            } else {
                true
            }
        });
        if let Some(tx) = &inner.done_tx {
            for id in finished {
                let _ = tx.send(id);
            }
        }
    }

    pub fn clock(&self) -> f64 {
        self.inner.lock().unwrap().clock
    }

    pub fn scheduled(&self) -> Vec<ScheduleRecord> {
        self.inner.lock().unwrap().scheduled.clone()
    }

    pub fn stopped_ids(&self) -> Vec<u64> {
        self.inner.lock().unwrap().stopped.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.inner.lock().unwrap().close_calls
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }
}

impl PlaybackSink for MockPlaybackSink {
    fn open(&mut self) -> Result<DoneStream> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = inner.fail_open.take() {
            anyhow::bail!(message);
        }
        inner.open_calls += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.done_tx = Some(tx);
        Ok(DoneStream::new(rx))
    }

    fn now(&self) -> f64 {
        self.inner.lock().unwrap().clock
    }

    fn schedule(&mut self, source: ScheduledSource) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let end = source.start_at + source.duration();
        inner.scheduled.push(ScheduleRecord {
            id: source.id,
            start_at: source.start_at,
            duration: source.duration(),
            frame_count: source.samples.len(),
        });
        inner.pending.push((source.id, end));
        Ok(())
    }

    fn stop_all(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<u64> = inner.pending.iter().map(|&(id, _)| id).collect();
        inner.stopped.extend(ids);
        inner.pending.clear();
    }

    fn close(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.close_calls += 1;
        inner.pending.clear();
        inner.done_tx = None;
        if let Some(message) = inner.fail_close.take() {
            anyhow::bail!(message);
        }
        Ok(())
    }
}

#[cfg(feature = "live")]
pub use live::SpeakerSink;

#[cfg(feature = "live")]
mod live {
    use super::*;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
    use rubato::{FftFixedIn, Resampler};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::thread::JoinHandle;
    use std::time::Duration;

    struct LiveSource {
        id: u64,
        samples: Vec<f32>,
        start_frame: u64,
        pos: usize,
    }

    /// Playback via the default cpal output device.
    ///
    /// Each scheduled source is resampled once up front, with the playback
    /// rate folded into the resample ratio, then mixed sample-accurately
    /// against a monotonic frame counter that also backs `now`. The cpal
    /// stream lives on a dedicated thread because it is not `Send`.
    pub struct SpeakerSink {
        mixer: Arc<Mutex<Vec<LiveSource>>>,
        frames_written: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        native_rate: Option<u32>,
        thread: Option<JoinHandle<()>>,
    }

    impl SpeakerSink {
        pub fn new() -> Self {
            Self {
                mixer: Arc::new(Mutex::new(Vec::new())),
                frames_written: Arc::new(AtomicU64::new(0)),
                running: Arc::new(AtomicBool::new(false)),
                native_rate: None,
                thread: None,
            }
        }
    }

    impl Default for SpeakerSink {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PlaybackSink for SpeakerSink {
        fn open(&mut self) -> Result<DoneStream> {
            let (done_tx, done_rx) = mpsc::unbounded_channel();
            let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<u32>>();

            self.running.store(true, Ordering::SeqCst);
            let mixer = self.mixer.clone();
            let frames = self.frames_written.clone();
            let running = self.running.clone();

            let thread = std::thread::Builder::new()
                .name("voxlet-speaker".into())
                .spawn(move || {
                    run_playback_thread(mixer, frames, running, done_tx, ready_tx);
                })
                .map_err(|e| anyhow::anyhow!("failed to spawn playback thread: {e}"))?;
            self.thread = Some(thread);

            match ready_rx.recv() {
                Ok(Ok(native_rate)) => {
                    self.native_rate = Some(native_rate);
                    Ok(DoneStream::new(done_rx))
                }
                Ok(Err(e)) => {
                    self.running.store(false, Ordering::SeqCst);
                    Err(e)
                }
                Err(_) => {
                    self.running.store(false, Ordering::SeqCst);
                    Err(anyhow::anyhow!("playback thread exited before starting"))
                }
            }
        }

        fn now(&self) -> f64 {
            match self.native_rate {
                Some(rate) => self.frames_written.load(Ordering::SeqCst) as f64 / rate as f64,
                None => 0.0,
            }
        }

        fn schedule(&mut self, source: ScheduledSource) -> Result<()> {
            let Some(native_rate) = self.native_rate else {
                anyhow::bail!("playback sink is not open");
            };

            // Folding the rate multiplier into the source rate both speeds
            // the audio up and shortens it, matching the scheduler's
            // duration arithmetic.
            let effective_rate = (source.sample_rate as f64 * source.rate).round() as u32;
            let samples = resample(&source.samples, effective_rate, native_rate)?;
            let start_frame = (source.start_at * native_rate as f64).round() as u64;

            let mut mixer = self.mixer.lock().unwrap();
            mixer.push(LiveSource {
                id: source.id,
                samples,
                start_frame,
                pos: 0,
            });
            Ok(())
        }

        fn stop_all(&mut self) {
            self.mixer.lock().unwrap().clear();
        }

        fn close(&mut self) -> Result<()> {
            self.running.store(false, Ordering::SeqCst);
            self.mixer.lock().unwrap().clear();
            if let Some(thread) = self.thread.take() {
                thread.thread().unpark();
                if thread.join().is_err() {
                    anyhow::bail!("playback thread panicked during release");
                }
            }
            Ok(())
        }
    }

    fn run_playback_thread(
        mixer: Arc<Mutex<Vec<LiveSource>>>,
        frames: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        done_tx: mpsc::UnboundedSender<u64>,
        ready_tx: std::sync::mpsc::Sender<Result<u32>>,
    ) {
        let stream = match open_output_stream(mixer, frames, done_tx) {
            Ok((stream, native_rate)) => {
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(anyhow::anyhow!("failed to start playback: {e}")));
                    return;
                }
                let _ = ready_tx.send(Ok(native_rate));
                stream
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        while running.load(Ordering::SeqCst) {
            std::thread::park_timeout(Duration::from_millis(100));
        }
        drop(stream);
    }

    fn open_output_stream(
        mixer: Arc<Mutex<Vec<LiveSource>>>,
        frames: Arc<AtomicU64>,
        done_tx: mpsc::UnboundedSender<u64>,
    ) -> Result<(cpal::Stream, u32)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no output device available"))?;
        let supported_config = device
            .default_output_config()
            .map_err(|e| anyhow::anyhow!("failed to get default output config: {e}"))?;

        tracing::debug!(
            device_name = ?device.name(),
            native_sample_rate = supported_config.sample_rate().0,
            native_channels = supported_config.channels(),
            native_format = ?supported_config.sample_format(),
            "playback sink initialized"
        );

        let native_rate = supported_config.sample_rate().0;
        let native_channels = supported_config.channels() as usize;
        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        let stream = match sample_format {
            SampleFormat::F32 => build_output_stream::<f32>(
                &device,
                &config,
                mixer,
                frames,
                done_tx,
                native_channels,
            )?,
            SampleFormat::I16 => build_output_stream::<i16>(
                &device,
                &config,
                mixer,
                frames,
                done_tx,
                native_channels,
            )?,
            format => anyhow::bail!("unsupported sample format: {format:?}"),
        };

        Ok((stream, native_rate))
    }

    fn build_output_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mixer: Arc<Mutex<Vec<LiveSource>>>,
        frames: Arc<AtomicU64>,
        done_tx: mpsc::UnboundedSender<u64>,
        native_channels: usize,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32> + Default + Send + 'static,
    {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frame_count = data.len() / native_channels;
                    let base = frames.fetch_add(frame_count as u64, Ordering::SeqCst);

                    let mut mixed = vec![0f32; frame_count];
                    let mut mixer = mixer.lock().unwrap();
                    for source in mixer.iter_mut() {
                        mix_source(source, base, &mut mixed);
                    }
                    mixer.retain(|source| {
                        if source.pos >= source.samples.len() {
                            let _ = done_tx.send(source.id);
                            false
                        } else {
                            true
                        }
                    });
                    drop(mixer);

                    for (i, slot) in data.chunks_mut(native_channels).enumerate() {
                        let sample = T::from_sample(mixed[i]);
                        slot.fill(sample);
                    }
                },
                move |err| {
                    tracing::error!(error = ?err, "playback stream error");
                },
                None,
            )
            .map_err(|e| anyhow::anyhow!("failed to build output stream: {e}"))
    }

    /// Mix one source into the buffer that starts at device frame `base`.
    fn mix_source(source: &mut LiveSource, base: u64, mixed: &mut [f32]) {
        let buffer_end = base + mixed.len() as u64;
        if source.start_frame >= buffer_end {
            return;
        }
        let offset = source.start_frame.saturating_sub(base) as usize;
        for slot in mixed[offset..].iter_mut() {
            let Some(&sample) = source.samples.get(source.pos) else {
                break;
            };
            *slot += sample;
            source.pos += 1;
        }
    }

    fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
        if source_rate == target_rate {
            return Ok(samples.to_vec());
        }

        let chunk_size = 1024;
        let mut resampler =
            FftFixedIn::<f32>::new(source_rate as usize, target_rate as usize, chunk_size, 2, 1)
                .map_err(|e| anyhow::anyhow!("failed to create playback resampler: {e}"))?;

        let mut output = Vec::new();
        let mut pos = 0;

        while pos < samples.len() {
            let frames_needed = resampler.input_frames_next();
            let end = (pos + frames_needed).min(samples.len());

            let mut input_chunk = samples[pos..end].to_vec();
            if input_chunk.len() < frames_needed {
                input_chunk.resize(frames_needed, 0.0);
            }

            match resampler.process(&[input_chunk], None) {
                Ok(resampled) => {
                    if let Some(chunk) = resampled.into_iter().next() {
                        output.extend(chunk);
                    }
                }
                Err(e) => anyhow::bail!("playback resampling failed: {e:?}"),
            }

            pos = end;
        }

        Ok(output)
    }
}
