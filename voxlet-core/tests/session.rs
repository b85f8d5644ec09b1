use voxlet_core::transport::mock::MockTransportBehavior;
use voxlet_core::transport::types::InboundEvent;
use voxlet_core::{SessionEvent, SessionState};


use fixture::{wait_until, Fixture};

#[tokio::test]
async fn session_connects_and_reaches_active() {
    let mut fixture = Fixture::new();

    let events = fixture.wait_for_state(SessionState::Active).await;
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SessionEvent::StateChanged(SessionState::Connecting))),
        "should pass through Connecting first"
    );

    assert_eq!(fixture.transport.connect_count(), 1);
    let request = fixture.transport.last_request().unwrap();
    assert_eq!(request.input_format.to_string(), "pcm;rate=16000");
    assert_eq!(request.output_format.to_string(), "pcm;rate=24000");
}

#[tokio::test]
async fn one_capture_frame_becomes_one_outbound_chunk() {
    let mut fixture = Fixture::new();
    fixture.wait_for_state(SessionState::Active).await;

    fixture.capture.push_frame(&vec![0.5f32; 4096]);

    let transport = fixture.transport.clone();
    wait_until("outbound chunk to arrive", || {
        transport.sent_chunks().len() == 1
    })
    .await;

    let chunks = fixture.transport.sent_chunks();
    assert_eq!(chunks[0].data.len(), 8192, "4096 samples at 16 bits");
    assert_eq!(chunks[0].format.to_string(), "pcm;rate=16000");
}

#[tokio::test]
async fn capture_frames_are_sent_in_order() {
    let mut fixture = Fixture::new();
    fixture.wait_for_state(SessionState::Active).await;

    for level in [0.1f32, 0.2, 0.3] {
        fixture.capture.push_frame(&vec![level; 16]);
    }

    let transport = fixture.transport.clone();
    wait_until("all outbound chunks to arrive", || {
        transport.sent_chunks().len() == 3
    })
    .await;

    let chunks = fixture.transport.sent_chunks();
    let first_sample = |chunk: &voxlet_core::audio::pcm::PcmChunk| {
        i16::from_le_bytes([chunk.data[0], chunk.data[1]])
    };
    assert!(first_sample(&chunks[0]) < first_sample(&chunks[1]));
    assert!(first_sample(&chunks[1]) < first_sample(&chunks[2]));
}

#[tokio::test]
async fn inbound_deltas_schedule_gapless_playback() {
    let mut fixture = Fixture::new();
    fixture.wait_for_state(SessionState::Active).await;

    fixture
        .transport
        .inject(InboundEvent::AudioDelta(fixture.delta_of_secs(0.5)));
    fixture
        .transport
        .inject(InboundEvent::AudioDelta(fixture.delta_of_secs(0.5)));

    let sink = fixture.sink.clone();
    wait_until("both sources to be scheduled", || {
        sink.scheduled().len() == 2
    })
    .await;

    let records = fixture.sink.scheduled();
    let expected = 0.5 / fixture.config.playback_rate;
    assert_eq!(records[0].start_at, 0.0);
    assert!(
        (records[1].start_at - expected).abs() < 1e-9,
        "second delta should start exactly when the first ends"
    );
}

#[tokio::test]
async fn speaking_indicator_follows_playback() {
    let mut fixture = Fixture::new();
    fixture.wait_for_state(SessionState::Active).await;

    fixture
        .transport
        .inject(InboundEvent::AudioDelta(fixture.delta_of_secs(0.5)));
    fixture
        .wait_for_event(|e| matches!(e, SessionEvent::Speaking(true)))
        .await;

    // Let the scheduled source run out.
    fixture.sink.advance(0.5);
    fixture
        .wait_for_event(|e| matches!(e, SessionEvent::Speaking(false)))
        .await;
}

#[tokio::test]
async fn interruption_stops_all_pending_playback() {
    let mut fixture = Fixture::new();
    fixture.wait_for_state(SessionState::Active).await;

    for _ in 0..3 {
        fixture
            .transport
            .inject(InboundEvent::AudioDelta(fixture.delta_of_secs(0.5)));
    }
    let sink = fixture.sink.clone();
    wait_until("all three sources to be scheduled", || {
        sink.scheduled().len() == 3
    })
    .await;

    fixture.transport.inject(InboundEvent::Interrupted);
    fixture
        .wait_for_event(|e| matches!(e, SessionEvent::Speaking(false)))
        .await;

    assert_eq!(fixture.sink.stopped_ids().len(), 3, "all three sources stopped");
    assert_eq!(fixture.sink.pending_count(), 0);

    // Audio arriving after the barge-in is a fresh stream, scheduled at
    // the device clock rather than after the stopped audio.
    fixture
        .transport
        .inject(InboundEvent::AudioDelta(fixture.delta_of_secs(0.5)));
    let sink = fixture.sink.clone();
    wait_until("post-interruption source to be scheduled", || {
        sink.scheduled().len() == 4
    })
    .await;
    assert_eq!(fixture.sink.scheduled()[3].start_at, fixture.sink.clock());
}

#[tokio::test]
async fn transport_error_closes_session_and_releases_once() {
    let mut fixture = Fixture::new();
    fixture.wait_for_state(SessionState::Active).await;

    fixture
        .transport
        .inject(InboundEvent::Error("network lost".into()));

    let events = fixture.wait_for_state(SessionState::Closed).await;

    let states: Vec<SessionState> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![SessionState::Closing, SessionState::Closed]);

    assert!(
        events.iter().any(
            |e| matches!(e, SessionEvent::Error(message) if message.contains("network lost"))
        ),
        "the transport error should surface after cleanup"
    );

    assert_eq!(fixture.sink.close_calls(), 1, "output device released once");
    assert!(fixture.capture.stopped(), "microphone released");
}

#[tokio::test]
async fn endpoint_close_ends_the_session_cleanly() {
    let mut fixture = Fixture::new();
    fixture.wait_for_state(SessionState::Active).await;

    fixture.transport.inject(InboundEvent::Closed);

    let events = fixture.wait_for_state(SessionState::Closed).await;
    assert!(
        !events.iter().any(|e| matches!(e, SessionEvent::Error(_))),
        "a clean close is not an error"
    );
    assert_eq!(fixture.sink.close_calls(), 1);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let mut fixture = Fixture::new();
    fixture.wait_for_state(SessionState::Active).await;

    fixture.session.stop();
    fixture.session.stop();
    fixture.wait_for_state(SessionState::Closed).await;
    fixture.session.stop();

    assert_eq!(fixture.sink.close_calls(), 1, "release ran exactly once");
    assert!(fixture.capture.stopped());
}

#[tokio::test]
async fn capture_loss_closes_the_session() {
    let mut fixture = Fixture::new();
    fixture.wait_for_state(SessionState::Active).await;

    fixture.capture.report_lost("device unplugged");

    let events = fixture.wait_for_state(SessionState::Closed).await;
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::Error(message) if message.contains("capture device lost"))
    ));
    assert_eq!(fixture.sink.close_calls(), 1);
}

#[tokio::test]
async fn connect_failure_never_reaches_active() {
    let mut fixture = Fixture::with_behavior(MockTransportBehavior::ConnectError {
        message: "endpoint unreachable".into(),
    });

    let events = fixture.wait_for_state(SessionState::Closed).await;
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, SessionEvent::StateChanged(SessionState::Active))),
        "session must not report Active on a failed connect"
    );
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::Error(message) if message.contains("endpoint unreachable"))
    ));

    // Devices acquired before the failed connect are still released.
    assert_eq!(fixture.sink.close_calls(), 1);
    assert!(fixture.capture.stopped());
}

#[tokio::test]
async fn denied_microphone_fails_session_start() {
    let mut fixture = Fixture::with_denied_microphone();

    let events = fixture.wait_for_state(SessionState::Closed).await;
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::Error(message) if message.contains("microphone access denied"))
    ));
    assert_eq!(
        fixture.transport.connect_count(),
        0,
        "no transport is opened without a microphone"
    );
}

#[tokio::test]
async fn unavailable_output_device_fails_session_start() {
    let mut fixture = Fixture::with_unavailable_sink("no output device");

    let events = fixture.wait_for_state(SessionState::Closed).await;
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, SessionEvent::StateChanged(SessionState::Active))),
    );
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::Error(message) if message.contains("playback device unavailable"))
    ));
    assert!(fixture.capture.stopped(), "microphone still released");
}

#[tokio::test]
async fn release_failure_lands_in_failed() {
    let mut fixture = Fixture::new();
    fixture.wait_for_state(SessionState::Active).await;

    fixture.sink.fail_close_with("device busy");
    fixture.session.stop();

    let events = fixture.wait_for_state(SessionState::Failed).await;
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::Error(message) if message.contains("device release failed"))
    ));
    assert!(
        fixture.capture.stopped(),
        "remaining release steps still ran"
    );
}

#[tokio::test]
async fn malformed_delta_is_dropped_without_ending_the_session() {
    let mut fixture = Fixture::new();
    fixture.wait_for_state(SessionState::Active).await;

    // Odd byte count: undecodable as PCM16.
    let bad = voxlet_core::audio::pcm::PcmChunk::new(
        vec![0u8; 3],
        voxlet_core::audio::pcm::AudioFormat::new(fixture.config.output_sample_rate),
    );
    fixture.transport.inject(InboundEvent::AudioDelta(bad));
    fixture
        .transport
        .inject(InboundEvent::AudioDelta(fixture.delta_of_secs(0.25)));

    let sink = fixture.sink.clone();
    wait_until("the good chunk to be scheduled", || {
        sink.scheduled().len() == 1
    })
    .await;

    // Still active: a per-chunk decode error never ends the session.
    fixture.session.stop();
    fixture.wait_for_state(SessionState::Closed).await;
}
