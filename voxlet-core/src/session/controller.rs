use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio::capture::{CaptureEvent, CaptureSource, FrameStream};
use crate::audio::pcm::PcmChunk;
use crate::audio::playback::{DoneStream, PlaybackSink};
use crate::audio::scheduler::PlaybackScheduler;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::events::SessionEvent;
use crate::session::state::SessionState;
use crate::transport::provider::{AudioSink, InboundStream, RealtimeTransport};
use crate::transport::types::InboundEvent;

/// Input messages to the session actor.
#[derive(Debug)]
pub enum SessionCommand {
    /// End the session and release every owned resource.
    Stop,
}

/// Handle to one running voice session.
///
/// The session is an actor owning every per-session resource: microphone
/// stream, output sink, transport handles, and the scheduling state. All of
/// it is touched only from the session task, and all of it is released on
/// every exit path. Dropping the handle also ends the session.
pub struct VoiceSession {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl VoiceSession {
    /// Launch a session and return a handle plus its event stream.
    pub fn launch(
        config: SessionConfig,
        transport: Box<dyn RealtimeTransport>,
        capture: Box<dyn CaptureSource>,
        sink: Box<dyn PlaybackSink>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_session(config, transport, capture, sink, rx, event_tx));

        (VoiceSession { tx }, event_rx)
    }

    /// Request a stop. Safe to call any number of times; the release
    /// sequence still runs exactly once.
    pub fn stop(&self) {
        let _ = self.tx.send(SessionCommand::Stop);
    }
}

struct SessionRuntime {
    state: SessionState,
    events: mpsc::UnboundedSender<SessionEvent>,
    scheduler: PlaybackScheduler,
    sink: Box<dyn PlaybackSink>,
    frames: Option<FrameStream>,
    outbound: Option<AudioSink>,
    speaking: bool,
}

impl SessionRuntime {
    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        info!(from = ?self.state, to = ?next, "session state changed");
        self.state = next;
        let _ = self.events.send(SessionEvent::StateChanged(next));
    }

    fn set_speaking(&mut self, speaking: bool) {
        if self.speaking == speaking {
            return;
        }
        self.speaking = speaking;
        let _ = self.events.send(SessionEvent::Speaking(speaking));
    }

    fn emit_error(&self, error: &SessionError) {
        let _ = self.events.send(SessionEvent::Error(error.to_string()));
    }
}

// Actor implementation as free functions
async fn run_session(
    config: SessionConfig,
    transport: Box<dyn RealtimeTransport>,
    capture: Box<dyn CaptureSource>,
    sink: Box<dyn PlaybackSink>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut runtime = SessionRuntime {
        state: SessionState::Idle,
        events,
        scheduler: PlaybackScheduler::new(config.output_sample_rate, config.playback_rate),
        sink,
        frames: None,
        outbound: None,
        speaking: false,
    };

    runtime.set_state(SessionState::Connecting);

    let reason = match open_session(&mut runtime, &config, transport, capture).await {
        Ok((inbound, done)) => run_active(&mut runtime, &mut commands, inbound, done).await,
        Err(e) => Some(e),
    };

    shutdown(&mut runtime, reason);
}

/// Acquire the microphone and output device, then open the transport.
/// Any failure here is fatal to session start; partial acquisitions are
/// released by the shutdown path.
async fn open_session(
    runtime: &mut SessionRuntime,
    config: &SessionConfig,
    transport: Box<dyn RealtimeTransport>,
    capture: Box<dyn CaptureSource>,
) -> Result<(InboundStream, DoneStream), SessionError> {
    let frames = capture
        .start()
        .map_err(|e| SessionError::PermissionDenied(e.to_string()))?;
    runtime.frames = Some(frames);

    let done = runtime
        .sink
        .open()
        .map_err(|e| SessionError::PlaybackUnavailable(e.to_string()))?;

    let (outbound, inbound) = transport
        .connect(config.connect_request())
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    runtime.outbound = Some(outbound);

    runtime.set_state(SessionState::Active);
    Ok((inbound, done))
}

/// The streaming loop. Capture frames, inbound events, playback
/// completions, and stop requests all land here, which serializes every
/// mutation of the scheduling state.
async fn run_active(
    runtime: &mut SessionRuntime,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    mut inbound: InboundStream,
    mut done: DoneStream,
) -> Option<SessionError> {
    let Some(mut frames) = runtime.frames.take() else {
        return Some(SessionError::CaptureLost("capture stream missing".into()));
    };

    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                // A dropped handle ends the session like an explicit stop.
                Some(SessionCommand::Stop) | None => break None,
            },

            event = frames.recv() => match event {
                Some(CaptureEvent::Chunk(chunk)) => {
                    if let Some(error) = forward_chunk(runtime, chunk).await {
                        break Some(error);
                    }
                }
                Some(CaptureEvent::Lost(message)) => {
                    break Some(SessionError::CaptureLost(message));
                }
                None => break Some(SessionError::CaptureLost("capture stream ended".into())),
            },

            event = inbound.recv() => match event {
                Some(InboundEvent::AudioDelta(chunk)) => handle_audio_delta(runtime, &chunk),
                Some(InboundEvent::Interrupted) => handle_interrupted(runtime),
                Some(InboundEvent::Closed) => break None,
                Some(InboundEvent::Error(message)) => {
                    break Some(SessionError::Transport(message));
                }
                None => break Some(SessionError::Transport("inbound channel closed".into())),
            },

            // Pattern-disabled once the sink closes its completion stream.
            Some(id) = done.recv() => {
                if runtime.scheduler.on_complete(id) {
                    runtime.set_speaking(false);
                }
            }
        }
    };

    runtime.frames = Some(frames);
    reason
}

/// Hand one captured chunk to the transport, in capture order.
async fn forward_chunk(runtime: &mut SessionRuntime, chunk: PcmChunk) -> Option<SessionError> {
    let Some(outbound) = &runtime.outbound else {
        return Some(SessionError::Transport("outbound handle missing".into()));
    };
    match outbound.send(chunk).await {
        Ok(()) => None,
        Err(_) => Some(SessionError::Transport("outbound audio channel closed".into())),
    }
}

fn handle_audio_delta(runtime: &mut SessionRuntime, chunk: &PcmChunk) {
    match runtime.scheduler.handle_chunk(chunk, runtime.sink.as_mut()) {
        Ok(started) => {
            if started {
                runtime.set_speaking(true);
            }
        }
        // Per-chunk decode problems are absorbed: drop, log, keep going.
        Err(e) => warn!(error = %e, "dropping malformed inbound chunk"),
    }
}

fn handle_interrupted(runtime: &mut SessionRuntime) {
    runtime.scheduler.interrupt(runtime.sink.as_mut());
    runtime.set_speaking(false);
}

/// Run the full release sequence, then land in `Closed` (or `Failed` if a
/// release step itself failed). The fatal error, if any, is surfaced only
/// after cleanup has run.
fn shutdown(runtime: &mut SessionRuntime, reason: Option<SessionError>) {
    runtime.set_state(SessionState::Closing);

    let release_errors = release_resources(runtime);

    if let Some(error) = &reason {
        runtime.emit_error(error);
    }
    for error in &release_errors {
        runtime.emit_error(error);
    }

    let final_state = if release_errors.is_empty() {
        SessionState::Closed
    } else {
        SessionState::Failed
    };
    runtime.set_state(final_state);
}

/// Best-effort release of every owned resource. A failing step is recorded
/// and the remaining steps still run.
fn release_resources(runtime: &mut SessionRuntime) -> Vec<SessionError> {
    let mut errors = Vec::new();

    // Stop playback first so no stale audio is heard after close.
    runtime.scheduler.interrupt(runtime.sink.as_mut());
    runtime.set_speaking(false);

    // Dropping the frame stream stops the microphone.
    runtime.frames = None;

    if let Err(e) = runtime.sink.close() {
        errors.push(SessionError::DeviceRelease(e.to_string()));
    }

    // Dropping the outbound handle closes the transport; close is
    // idempotent on the remote side.
    runtime.outbound = None;

    errors
}
