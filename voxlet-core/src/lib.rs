pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

// Public library API - the embedding widget drives a session through these
// types; everything else is public for tests and advanced embedders.
pub use config::{create_transport, SessionConfig, TransportConfig};
pub use error::{DecodeError, SessionError};
pub use session::{SessionEvent, SessionState, VoiceSession};
pub use transport::{MockTransport, MockTransportBehavior, RealtimeTransport};
