//! Integration tests against real audio hardware and a real endpoint
//!
//! # Running live tests
//!
//! These tests need a microphone, speakers, and (for the full session) a
//! realtime endpoint. They are marked #[ignore] and won't run in normal CI.
//!
//! To run:
//! ```sh
//! VOXLET_ENDPOINT=wss://... VOXLET_API_KEY=... \
//!     cargo test -p voxlet-core --features live live_ -- --ignored --nocapture
//! ```

#![cfg(feature = "live")]

use std::env;
use std::path::Path;
use std::time::Duration;

use voxlet_core::audio::capture::MicSource;
use voxlet_core::audio::pcm::{self, AudioFormat, PcmChunk};
use voxlet_core::audio::playback::{PlaybackSink, SpeakerSink};
use voxlet_core::audio::scheduler::PlaybackScheduler;
use voxlet_core::audio::AudioProfile;
use voxlet_core::{SessionConfig, SessionEvent, SessionState, TransportConfig, VoiceSession};

fn load_wav_as_chunk(path: &Path, expected_rate: u32) -> anyhow::Result<PcmChunk> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate != expected_rate {
        tracing::warn!(
            "WAV file is {} Hz, the playback path expects {} Hz. Results may vary.",
            spec.sample_rate,
            expected_rate
        );
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .into_samples::<i16>()
            .map(|s| s.unwrap() as f32 / 32768.0)
            .collect(),
        hound::SampleFormat::Float => reader.into_samples::<f32>().map(|s| s.unwrap()).collect(),
    };

    let mono: Vec<f32> = if spec.channels == 2 {
        samples.chunks(2).map(|pair| (pair[0] + pair[1]) / 2.0).collect()
    } else {
        samples
    };

    Ok(PcmChunk::new(
        pcm::float_to_pcm16(&mono),
        AudioFormat::new(expected_rate),
    ))
}

#[tokio::test]
#[ignore] // Requires an audio output device and tests/test.wav
async fn live_wav_playback() {
    let _ = tracing_subscriber::fmt().try_init();

    let path = Path::new("tests/test.wav");
    assert!(path.exists(), "test audio file not found: {path:?}");

    let chunk = load_wav_as_chunk(path, 24_000).expect("failed to load WAV file");
    println!(
        "Loaded {} frames ({:.2}s), playing...",
        chunk.frame_count(),
        chunk.duration_secs()
    );

    let mut sink = SpeakerSink::new();
    let mut done = sink.open().expect("failed to open output device");
    let mut scheduler = PlaybackScheduler::new(24_000, 1.0);

    scheduler
        .handle_chunk(&chunk, &mut sink)
        .expect("failed to schedule chunk");

    let id = tokio::time::timeout(Duration::from_secs(30), done.recv())
        .await
        .expect("playback did not complete in time")
        .expect("done stream ended early");
    assert!(scheduler.on_complete(id), "playback should drain to idle");

    sink.close().expect("failed to release output device");
    println!("Playback complete.");
}

#[tokio::test]
#[ignore] // Requires microphone, speakers, endpoint credentials
async fn live_full_session() {
    let _ = tracing_subscriber::fmt().try_init();

    let url = env::var("VOXLET_ENDPOINT").expect("VOXLET_ENDPOINT not set");
    let api_key = env::var("VOXLET_API_KEY").ok();

    let config = SessionConfig {
        transport: TransportConfig::WebSocket { url, api_key },
        system_instruction: Some("You are a friendly support agent.".into()),
        ..SessionConfig::default()
    };

    let transport =
        voxlet_core::create_transport(&config.transport).expect("failed to create transport");
    let capture = MicSource::new(AudioProfile::mono(config.input_sample_rate));
    let sink = SpeakerSink::new();

    let (session, mut events) =
        VoiceSession::launch(config, transport, Box::new(capture), Box::new(sink));

    println!("Session running; speak into the microphone (30 second timeout)");
    let mut deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let mut stop_requested = false;

    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => {
                assert!(!stop_requested, "session did not close after stop");
                println!("Timeout reached, stopping session");
                session.stop();
                stop_requested = true;
                deadline = tokio::time::Instant::now() + Duration::from_secs(5);
                continue;
            }
        };

        println!("[event] {event:?}");
        if matches!(
            event,
            SessionEvent::StateChanged(SessionState::Closed)
                | SessionEvent::StateChanged(SessionState::Failed)
        ) {
            break;
        }
    }

    println!("Done.");
}
