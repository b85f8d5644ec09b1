use serde::{Deserialize, Serialize};

/// Lifecycle states of a voice session.
///
/// `Idle → Connecting → Active → Closing → Closed`, with `Failed` terminal
/// from any non-terminal state when cleanup itself goes wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}
