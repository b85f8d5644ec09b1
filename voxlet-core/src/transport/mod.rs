//! Duplex message channel to the remote conversational endpoint

pub mod mock;
pub mod provider;
pub mod types;

#[cfg(feature = "live")]
pub mod websocket;

pub use mock::{MockTransport, MockTransportBehavior};
pub use provider::{AudioSink, InboundStream, RealtimeTransport};
pub use types::{ConnectRequest, InboundEvent};
