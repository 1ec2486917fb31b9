//! History sync: the thin adapter over the remote conversation store
//!
//! Reads never merge: loading a conversation replaces the transcript
//! wholesale, and is refused while a stream session is active. Writes are
//! never optimistic: the local view only changes after the server
//! confirms.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use rill_api::{
    HistoryEntry, ImageAttachment, Role, StoredMessage, Turn,
    request::{ContentPart, WireContent},
};

use crate::{
    backend::Backend,
    context::SessionContext,
    controller::ChatHandle,
    error::{Error, Result},
    events::{ChatEvent, Notice},
    transcript::TranscriptStore,
};

/// Remote history operations bound to a controller's shared state
#[derive(Clone)]
pub struct HistorySync {
    backend: Arc<dyn Backend>,
    ctx: SessionContext,
    store: TranscriptStore,
    handle: ChatHandle,
    events: broadcast::Sender<ChatEvent>,
    conversation_id: Arc<Mutex<String>>,
}

impl HistorySync {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        ctx: SessionContext,
        store: TranscriptStore,
        handle: ChatHandle,
        events: broadcast::Sender<ChatEvent>,
        conversation_id: Arc<Mutex<String>>,
    ) -> Self {
        Self {
            backend,
            ctx,
            store,
            handle,
            events,
            conversation_id,
        }
    }

    fn token(&self) -> Result<String> {
        self.ctx.token().ok_or(Error::NotAuthenticated)
    }

    /// Fetch the conversation list. Order is server-defined and opaque.
    pub async fn list(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.backend.history_list(&self.token()?).await?)
    }

    /// Load a conversation, replacing the local transcript wholesale.
    /// Refused while a session is streaming: the transcript must not be
    /// swapped out from under an in-flight apply.
    pub async fn load(&self, conversation_id: &str) -> Result<()> {
        if self.handle.is_running() {
            return Err(Error::Busy);
        }
        let stored = self
            .backend
            .history_detail(&self.token()?, conversation_id)
            .await?;
        let turns = stored.into_iter().map(turn_from_stored).collect();
        self.store.replace(turns);
        *self.conversation_id.lock() = conversation_id.to_string();
        let _ = self.events.send(ChatEvent::ConversationChanged {
            conversation_id: conversation_id.to_string(),
        });
        Ok(())
    }

    /// Rename a conversation. The cached entry only changes once the
    /// server confirms.
    pub async fn rename(&self, conversation_id: &str, title: &str) -> Result<()> {
        self.backend
            .history_rename(&self.token()?, conversation_id, title)
            .await?;
        self.refresh().await;
        Ok(())
    }

    /// Delete a conversation. Deleting the active one allocates a fresh
    /// identity and clears the transcript rather than leaving a dangling
    /// reference.
    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        self.backend
            .history_delete(&self.token()?, conversation_id)
            .await?;

        let fresh = {
            let mut current = self.conversation_id.lock();
            if *current == conversation_id {
                let fresh = uuid::Uuid::new_v4().to_string();
                *current = fresh.clone();
                Some(fresh)
            } else {
                None
            }
        };
        if let Some(fresh) = fresh {
            self.store.clear();
            let _ = self.events.send(ChatEvent::ConversationChanged {
                conversation_id: fresh,
            });
        }

        self.refresh().await;
        Ok(())
    }

    /// Re-fetch the remote list and broadcast it; failures surface as
    /// notices only and change nothing.
    pub async fn refresh(&self) {
        let Ok(token) = self.token() else {
            return;
        };
        match self.backend.history_list(&token).await {
            Ok(entries) => {
                let _ = self.events.send(ChatEvent::HistoryRefreshed { entries });
            }
            Err(err) => {
                let _ = self.events.send(ChatEvent::Notice {
                    notice: Notice::HistoryFailed {
                        message: err.to_string(),
                    },
                });
            }
        }
    }
}

/// Map a stored message back into a transcript turn. Stored content is
/// either a plain string or the same part list used in requests.
fn turn_from_stored(message: StoredMessage) -> Turn {
    let (text, images) = match message.content {
        WireContent::Text(text) => (text, Vec::new()),
        WireContent::Parts(parts) => {
            let mut text = String::new();
            let mut images = Vec::new();
            for part in parts {
                match part {
                    ContentPart::Text { text: part_text } => text.push_str(&part_text),
                    ContentPart::ImageUrl { image_url } => {
                        images.push(ImageAttachment::new("history-image", image_url.url));
                    }
                }
            }
            (text, images)
        }
    };

    match message.role {
        Role::User => Turn::user(text, images, Vec::new()),
        Role::Assistant => {
            let mut turn = Turn::assistant(false);
            turn.text = text;
            turn
        }
    }
}
