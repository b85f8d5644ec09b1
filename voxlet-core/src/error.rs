use thiserror::Error;

/// Errors that end a session.
///
/// Everything here is fatal to the session as a whole: the controller runs
/// the full release sequence before surfacing one of these. Per-chunk
/// problems are [`DecodeError`] and never escalate past a dropped chunk.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Microphone access was refused or no input device could be opened.
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    /// The capture device disappeared mid-session.
    #[error("capture device lost: {0}")]
    CaptureLost(String),

    /// No output device could be opened for playback.
    #[error("playback device unavailable: {0}")]
    PlaybackUnavailable(String),

    /// Connect failure, mid-session disconnect, or a malformed channel.
    #[error("transport failed: {0}")]
    Transport(String),

    /// A resource release step failed during cleanup. Remaining steps still
    /// run; the session ends in `Failed` instead of `Closed`.
    #[error("device release failed: {0}")]
    DeviceRelease(String),
}

/// Errors decoding a single inbound chunk. The offending chunk is dropped
/// and logged; the session continues.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid transport encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("pcm16 payload has odd length ({0} bytes)")]
    OddLength(usize),

    #[error("unexpected audio format: got {got}, expected {expected}")]
    UnexpectedFormat { got: String, expected: String },

    #[error("unparseable audio format tag: {0}")]
    BadFormatTag(String),
}
