//! Client event types

use rill_api::HistoryEntry;
use serde::{Deserialize, Serialize};

use crate::session::SessionState;

/// Events emitted by the controller for rendering layers to observe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A stream session started for the given assistant turn
    StreamStarted { turn_id: String },

    /// The active stream session reached a terminal state
    StreamFinished {
        turn_id: String,
        state: SessionState,
    },

    /// The active conversation identity changed (new conversation, history
    /// load, server echo, or deletion of the active conversation)
    ConversationChanged { conversation_id: String },

    /// Remaining quota was refreshed
    QuotaUpdated { remaining: i64 },

    /// The remote history list was re-fetched
    HistoryRefreshed { entries: Vec<HistoryEntry> },

    /// A user-facing notice
    Notice { notice: Notice },
}

/// User-facing notices. These never carry control flow; they surface
/// conditions a rendering layer may want to explain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// The server disabled web search for this request (e.g. "image")
    SearchDisabled { reason: String },

    /// The chat endpoint reported the quota as exhausted
    QuotaExhausted { message: String },

    /// A history operation failed; prior state is unchanged
    HistoryFailed { message: String },
}
