use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// `SessionEvent`s are the output of the session actor.
///
/// The embedding application (chat widget, tests) renders these: state
/// changes drive the session UI, `Speaking` drives the talking/listening
/// indicator, and `Error` surfaces anything fatal after cleanup has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// True when synthesized speech starts from idle, false when the last
    /// scheduled source drains or playback is interrupted.
    Speaking(bool),
    Error(String),
}
