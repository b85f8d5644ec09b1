//! Session lifecycle: the actor that wires capture, transport, and playback

pub mod controller;
pub mod events;
pub mod state;

pub use controller::{SessionCommand, VoiceSession};
pub use events::SessionEvent;
pub use state::SessionState;
