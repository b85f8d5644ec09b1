//! Microphone capture and outbound chunk encoding
//!
//! The capture callback does exactly two things: PCM16 encoding and a
//! non-blocking handoff into the frame channel. Everything else (sending to
//! the transport) happens on the session task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use super::pcm::{self, AudioFormat, PcmChunk};
use super::AudioProfile;

/// Converts captured float frames into transport-ready [`PcmChunk`]s.
#[derive(Debug, Clone)]
pub struct CaptureEncoder {
    format: AudioFormat,
}

impl CaptureEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            format: AudioFormat::new(sample_rate),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Encode one captured frame. Pure conversion, safe in a device callback.
    pub fn encode(&self, samples: &[f32]) -> PcmChunk {
        PcmChunk::new(pcm::float_to_pcm16(samples), self.format)
    }
}

/// Events produced by a capture source.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// One encoded frame of microphone audio.
    Chunk(PcmChunk),
    /// The device disappeared mid-session. The source stops producing and
    /// does not retry.
    Lost(String),
}

/// A live microphone boundary. Implementations deliver encoded frames at a
/// fixed rate until the returned stream is dropped.
pub trait CaptureSource: Send {
    fn profile(&self) -> AudioProfile;

    /// Begin capturing, consuming the source. Fails if the device cannot be
    /// opened or access is refused.
    fn start(self: Box<Self>) -> Result<FrameStream>;
}

/// Stream of capture events. Dropping it stops capture (RAII).
pub struct FrameStream {
    receiver: mpsc::Receiver<CaptureEvent>,
    running: Arc<AtomicBool>,
}

impl FrameStream {
    pub fn new(receiver: mpsc::Receiver<CaptureEvent>, running: Arc<AtomicBool>) -> Self {
        Self { receiver, running }
    }

    /// Receive the next capture event. Returns None once the source stops.
    pub async fn recv(&mut self) -> Option<CaptureEvent> {
        self.receiver.recv().await
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Scripted capture source for tests and embedders without audio hardware.
///
/// Frames pushed through the handle go through the same [`CaptureEncoder`]
/// path as the live microphone.
pub struct MockCaptureSource {
    profile: AudioProfile,
    receiver: mpsc::Receiver<CaptureEvent>,
    running: Arc<AtomicBool>,
    fail_start: Option<String>,
}

/// Test-side handle for a [`MockCaptureSource`].
#[derive(Clone)]
pub struct MockCaptureHandle {
    encoder: CaptureEncoder,
    sender: mpsc::Sender<CaptureEvent>,
    running: Arc<AtomicBool>,
}

impl MockCaptureSource {
    pub fn new(profile: AudioProfile) -> (Self, MockCaptureHandle) {
        let (sender, receiver) = mpsc::channel(100);
        let running = Arc::new(AtomicBool::new(true));
        let source = Self {
            profile,
            receiver,
            running: running.clone(),
            fail_start: None,
        };
        let handle = MockCaptureHandle {
            encoder: CaptureEncoder::new(profile.sample_rate),
            sender,
            running,
        };
        (source, handle)
    }

    /// A source whose start fails, as when microphone permission is refused.
    pub fn denied(message: impl Into<String>) -> (Self, MockCaptureHandle) {
        let (mut source, handle) = Self::new(AudioProfile::mono(16_000));
        source.fail_start = Some(message.into());
        (source, handle)
    }
}

impl CaptureSource for MockCaptureSource {
    fn profile(&self) -> AudioProfile {
        self.profile
    }

    fn start(self: Box<Self>) -> Result<FrameStream> {
        if let Some(message) = self.fail_start {
            anyhow::bail!(message);
        }
        Ok(FrameStream::new(self.receiver, self.running))
    }
}

impl MockCaptureHandle {
    /// Push one raw frame as if the device callback fired.
    pub fn push_frame(&self, samples: &[f32]) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let chunk = self.encoder.encode(samples);
        if self.sender.try_send(CaptureEvent::Chunk(chunk)).is_err() {
            tracing::warn!("mock capture channel full, dropping frame");
        }
    }

    /// Simulate the device disappearing.
    pub fn report_lost(&self, message: impl Into<String>) {
        let _ = self.sender.try_send(CaptureEvent::Lost(message.into()));
    }

    /// True once the session has released the capture stream.
    pub fn stopped(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }
}

#[cfg(feature = "live")]
pub use live::MicSource;

#[cfg(feature = "live")]
mod live {
    use super::*;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
    use rubato::{FftFixedIn, Resampler};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Microphone capture via the default cpal input device.
    ///
    /// Captures at the device's native rate and resamples to the session's
    /// input rate. The cpal stream lives on a dedicated thread because it is
    /// not `Send`; the thread exits when the [`FrameStream`] is dropped.
    pub struct MicSource {
        profile: AudioProfile,
    }

    impl MicSource {
        pub fn new(profile: AudioProfile) -> Self {
            Self { profile }
        }
    }

    impl CaptureSource for MicSource {
        fn profile(&self) -> AudioProfile {
            self.profile
        }

        fn start(self: Box<Self>) -> Result<FrameStream> {
            let (tx, rx) = mpsc::channel::<CaptureEvent>(100);
            let running = Arc::new(AtomicBool::new(true));
            let thread_running = running.clone();
            let target_rate = self.profile.sample_rate;

            let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

            std::thread::Builder::new()
                .name("voxlet-mic".into())
                .spawn(move || {
                    run_capture_thread(target_rate, tx, thread_running, ready_tx);
                })
                .map_err(|e| anyhow::anyhow!("failed to spawn capture thread: {e}"))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(FrameStream::new(rx, running)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(anyhow::anyhow!("capture thread exited before starting")),
            }
        }
    }

    fn run_capture_thread(
        target_rate: u32,
        tx: mpsc::Sender<CaptureEvent>,
        running: Arc<AtomicBool>,
        ready_tx: std::sync::mpsc::Sender<Result<()>>,
    ) {
        let stream = match open_input_stream(target_rate, tx, running.clone()) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(anyhow::anyhow!("failed to start input stream: {e}")));
            return;
        }
        let _ = ready_tx.send(Ok(()));

        // Keep the stream alive until the session drops its FrameStream.
        while running.load(Ordering::SeqCst) {
            std::thread::park_timeout(Duration::from_millis(100));
        }
    }

    fn open_input_stream(
        target_rate: u32,
        tx: mpsc::Sender<CaptureEvent>,
        running: Arc<AtomicBool>,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("no input device available"))?;
        let supported_config = device
            .default_input_config()
            .map_err(|e| anyhow::anyhow!("failed to get default input config: {e}"))?;

        tracing::debug!(
            device_name = ?device.name(),
            native_sample_rate = supported_config.sample_rate().0,
            native_channels = supported_config.channels(),
            native_format = ?supported_config.sample_format(),
            target_sample_rate = target_rate,
            "microphone capture initialized"
        );

        let native_rate = supported_config.sample_rate().0;
        let native_channels = supported_config.channels() as usize;
        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        let chunk_size = 1024;
        let resampler = FftFixedIn::new(
            native_rate as usize,
            target_rate as usize,
            chunk_size,
            2,
            1, // mono output
        )
        .map_err(|e| anyhow::anyhow!("failed to create capture resampler: {e}"))?;
        let resampler = Arc::new(Mutex::new(PendingResample {
            resampler,
            buffer: Vec::with_capacity(chunk_size * 2),
        }));
        let encoder = CaptureEncoder::new(target_rate);

        match sample_format {
            SampleFormat::I16 => build_input_stream::<i16>(
                &device,
                &config,
                tx,
                running,
                native_channels,
                resampler,
                encoder,
            ),
            SampleFormat::F32 => build_input_stream::<f32>(
                &device,
                &config,
                tx,
                running,
                native_channels,
                resampler,
                encoder,
            ),
            format => anyhow::bail!("unsupported sample format: {format:?}"),
        }
    }

    struct PendingResample {
        resampler: FftFixedIn<f32>,
        buffer: Vec<f32>,
    }

    #[allow(clippy::too_many_arguments)]
    fn build_input_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        tx: mpsc::Sender<CaptureEvent>,
        running: Arc<AtomicBool>,
        native_channels: usize,
        resampler: Arc<Mutex<PendingResample>>,
        encoder: CaptureEncoder,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        let callback_running = running.clone();
        let err_tx = tx.clone();
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    if !callback_running.load(Ordering::SeqCst) {
                        return;
                    }
                    let mono = downmix_to_f32(data, native_channels);
                    let resampled = drain_resampler(&mono, &resampler);
                    if resampled.is_empty() {
                        return;
                    }
                    let chunk = encoder.encode(&resampled);
                    // Never block the capture callback; drop on backpressure.
                    if tx.try_send(CaptureEvent::Chunk(chunk)).is_err() {
                        tracing::warn!("capture channel full, dropping frame");
                    }
                },
                move |err| {
                    tracing::error!(error = ?err, "microphone stream error");
                    running.store(false, Ordering::SeqCst);
                    let _ = err_tx.try_send(CaptureEvent::Lost(err.to_string()));
                },
                None,
            )
            .map_err(|e| anyhow::anyhow!("failed to build input stream: {e}"))
    }

    /// Convert samples of any supported type to mono f32.
    fn downmix_to_f32<T>(samples: &[T], channels: usize) -> Vec<f32>
    where
        T: Copy,
        f32: FromSample<T>,
    {
        if channels == 1 {
            return samples.iter().map(|&s| f32::from_sample(s)).collect();
        }
        samples
            .chunks(channels)
            .map(|frame| {
                let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                sum / channels as f32
            })
            .collect()
    }

    /// Feed samples through the resampler, emitting every complete chunk.
    fn drain_resampler(mono: &[f32], resampler: &Arc<Mutex<PendingResample>>) -> Vec<f32> {
        let Ok(mut state) = resampler.lock() else {
            return Vec::new();
        };

        state.buffer.extend_from_slice(mono);

        let mut output = Vec::new();
        loop {
            let frames_needed = state.resampler.input_frames_next();
            if state.buffer.len() < frames_needed {
                break;
            }

            let input = vec![state.buffer[..frames_needed].to_vec()];
            match state.resampler.process(&input, None) {
                Ok(resampled) => {
                    if let Some(chunk) = resampled.into_iter().next() {
                        output.extend(chunk);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = ?e, "capture resampling failed");
                    break;
                }
            }

            state.buffer.drain(..frames_needed);
        }

        output
    }
}
