//! rill-chat: conversation state and the streaming turn controller
//!
//! This crate owns the transcript, the stream session state machine, the
//! turn controller that sequences sends and edits, and the history sync
//! adapter over the remote conversation store.

pub mod backend;
pub mod context;
pub mod controller;
pub mod error;
pub mod events;
pub mod history;
pub mod session;
pub mod transcript;

pub use backend::Backend;
pub use context::{AuthUser, SessionContext};
pub use controller::{ChatController, ChatHandle, Draft};
pub use error::{Error, Result};
pub use events::{ChatEvent, Notice};
pub use history::HistorySync;
pub use session::{SessionOutcome, SessionState, StreamFailure, StreamSession};
pub use transcript::{Transcript, TranscriptStore};
