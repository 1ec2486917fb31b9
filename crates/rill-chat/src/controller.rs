//! Turn controller: sequences sends, edits, and conversation lifecycle
//!
//! All transcript mutations funnel through the controller — it is the
//! single writer. Precondition checks are synchronous and never touch the
//! network; at most one stream session is active at a time.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use rill_api::{
    AuthSession, ChatMode, DocPayload, ImageAttachment, Role, SendOptions, Turn,
    build_chat_request,
};

use crate::{
    backend::Backend,
    context::SessionContext,
    error::{Error, Result},
    events::{ChatEvent, Notice},
    history::HistorySync,
    session::{SessionOutcome, SessionState, StreamFailure, StreamSession},
    transcript::TranscriptStore,
};

/// Pending input state. Taken (and thereby cleared) when a send begins, so
/// a later edit action can never observe stale pending state.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: String,
    pub images: Vec<ImageAttachment>,
    pub docs: Vec<DocPayload>,
    /// Id of the user turn being edited, if this send is an edit-resend
    pub edit_target: Option<String>,
}

impl Draft {
    /// Nothing to send: no text and no attachments
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty() && self.docs.is_empty()
    }
}

/// Cloneable handle for observing and stopping the active stream from
/// outside the controller. All fields are `Arc`-wrapped, so cloning is
/// cheap.
#[derive(Clone)]
pub struct ChatHandle {
    cancel: Arc<Mutex<CancellationToken>>,
    running: Arc<AtomicBool>,
}

impl ChatHandle {
    fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation of the active stream. Idempotent: a no-op when
    /// no session is active or the session already reached a terminal
    /// state.
    pub fn stop(&self) {
        self.cancel.lock().cancel();
    }

    /// Whether a stream session is currently active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Install a fresh token for a new session and return it
    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }
}

/// The orchestrator for one conversation view. Cloning is cheap; all
/// clones share the same state.
#[derive(Clone)]
pub struct ChatController {
    backend: Arc<dyn Backend>,
    ctx: SessionContext,
    store: TranscriptStore,
    handle: ChatHandle,
    events: broadcast::Sender<ChatEvent>,
    conversation_id: Arc<Mutex<String>>,
    draft: Arc<Mutex<Draft>>,
    options: Arc<Mutex<SendOptions>>,
}

impl ChatController {
    /// Create a controller. `conversation_id` resumes a persisted
    /// conversation; a fresh identity is generated otherwise.
    pub fn new(
        backend: Arc<dyn Backend>,
        ctx: SessionContext,
        conversation_id: Option<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            backend,
            ctx,
            store: TranscriptStore::new(),
            handle: ChatHandle::new(),
            events,
            conversation_id: Arc::new(Mutex::new(
                conversation_id.unwrap_or_else(new_conversation_id),
            )),
            draft: Arc::new(Mutex::new(Draft::default())),
            options: Arc::new(Mutex::new(SendOptions::default())),
        }
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> TranscriptStore {
        self.store.clone()
    }

    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    pub fn context(&self) -> SessionContext {
        self.ctx.clone()
    }

    pub fn conversation_id(&self) -> String {
        self.conversation_id.lock().clone()
    }

    pub fn options(&self) -> SendOptions {
        *self.options.lock()
    }

    pub fn set_options(&self, f: impl FnOnce(&mut SendOptions)) {
        f(&mut self.options.lock());
    }

    pub fn draft(&self) -> Draft {
        self.draft.lock().clone()
    }

    pub fn update_draft(&self, f: impl FnOnce(&mut Draft)) {
        f(&mut self.draft.lock());
    }

    /// History operations bound to this controller's shared state
    pub fn history(&self) -> HistorySync {
        HistorySync::new(
            self.backend.clone(),
            self.ctx.clone(),
            self.store.clone(),
            self.handle.clone(),
            self.events.clone(),
            self.conversation_id.clone(),
        )
    }

    /// Validate a token and install the resulting identity and quota
    pub async fn login(&self, token: impl Into<String>) -> Result<AuthSession> {
        let token = token.into();
        let auth = self.backend.validate_token(&token).await?;
        self.ctx.install(token, auth.clone());
        let _ = self.events.send(ChatEvent::QuotaUpdated {
            remaining: auth.remaining_quota,
        });
        Ok(auth)
    }

    /// Clear identity, quota, and the local transcript
    pub fn logout(&self) {
        self.ctx.clear();
        self.store.clear();
    }

    /// Start a fresh conversation: new identity, empty transcript
    pub fn new_conversation(&self) -> Result<String> {
        if self.handle.is_running() {
            return Err(Error::Busy);
        }
        let id = new_conversation_id();
        *self.conversation_id.lock() = id.clone();
        self.store.clear();
        let _ = self.events.send(ChatEvent::ConversationChanged {
            conversation_id: id.clone(),
        });
        Ok(id)
    }

    /// Begin editing the most recent user turn: its text and images are
    /// copied into the draft. Attached documents are not replayable —
    /// their content was sent once and only metadata is retained.
    pub fn begin_edit(&self, turn_id: &str) -> Result<()> {
        if self.handle.is_running() {
            return Err(Error::Busy);
        }
        let last_user = self
            .store
            .last_turn_of(Role::User)
            .ok_or(Error::NotEditable)?;
        if last_user.id != turn_id {
            return Err(Error::NotEditable);
        }
        let mut draft = self.draft.lock();
        draft.text = last_user.text.clone();
        draft.images = last_user.images.clone();
        draft.docs.clear();
        draft.edit_target = Some(last_user.id);
        Ok(())
    }

    /// Abandon a pending edit without sending
    pub fn cancel_edit(&self) {
        let mut draft = self.draft.lock();
        if draft.edit_target.take().is_some() {
            draft.text.clear();
            draft.images.clear();
        }
    }

    /// Send the current draft and drive the stream session to a terminal
    /// state.
    ///
    /// An edit-resend truncates the transcript at the edited turn before
    /// the new user turn and a fresh assistant turn are appended. On every
    /// terminal state the history list is refreshed — including failures
    /// and aborts, since the server may have persisted the turn anyway.
    pub async fn send(&self) -> Result<SessionOutcome> {
        // Claim the single session slot first; two racing sends must not
        // both pass the check.
        if self
            .handle
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }

        let (token, draft) = match self.prepare_send() {
            Ok(prepared) => prepared,
            Err(err) => {
                self.handle.running.store(false, Ordering::Release);
                return Err(err);
            }
        };

        let cancel = self.handle.fresh_token();
        let outcome = self.run_send(&token, draft, cancel).await;
        self.handle.running.store(false, Ordering::Release);

        // Keep the remote list current even for failed or aborted turns.
        self.history().refresh().await;

        Ok(outcome)
    }

    /// Synchronous precondition checks; taking the draft clears the
    /// transient input state before any network activity begins.
    fn prepare_send(&self) -> Result<(String, Draft)> {
        let token = self.ctx.token().ok_or(Error::NotAuthenticated)?;
        if let Some(quota) = self.ctx.remaining_quota() {
            if quota <= 0 {
                return Err(Error::QuotaExhausted);
            }
        }
        let mut draft = self.draft.lock();
        if draft.is_empty() {
            return Err(Error::EmptyDraft);
        }
        Ok((token, std::mem::take(&mut *draft)))
    }

    async fn run_send(
        &self,
        token: &str,
        draft: Draft,
        cancel: CancellationToken,
    ) -> SessionOutcome {
        let options = *self.options.lock();

        // Edit-rebase: drop the edited turn and everything after it. The
        // truncate happens-before this send's own appends.
        if let Some(edit_target) = &draft.edit_target {
            self.store.truncate_from(edit_target);
        }

        let prior = self.store.snapshot();
        let user_turn = Turn::user(
            draft.text.trim(),
            draft.images,
            draft.docs.iter().map(DocPayload::metadata).collect(),
        );
        let assistant_turn = Turn::assistant(options.mode == ChatMode::Deep);
        let target_turn_id = assistant_turn.id.clone();

        let conversation_id = self.conversation_id.lock().clone();
        let request = build_chat_request(
            &conversation_id,
            &prior.turns,
            &user_turn,
            &draft.docs,
            &options,
        );

        self.store.append(user_turn);
        self.store.append(assistant_turn);
        let _ = self.events.send(ChatEvent::StreamStarted {
            turn_id: target_turn_id.clone(),
        });

        let mut session = StreamSession::new(&target_turn_id, cancel);
        let outcome = session
            .run(self.backend.as_ref(), token, &request, &self.store)
            .await;

        self.finish_session(&target_turn_id, &outcome, token).await;
        outcome
    }

    async fn finish_session(&self, turn_id: &str, outcome: &SessionOutcome, token: &str) {
        if let Some(echoed) = &outcome.conversation_id {
            let changed = {
                let mut current = self.conversation_id.lock();
                if *current != *echoed {
                    *current = echoed.clone();
                    true
                } else {
                    false
                }
            };
            if changed {
                let _ = self.events.send(ChatEvent::ConversationChanged {
                    conversation_id: echoed.clone(),
                });
            }
        }

        if let Some(reason) = &outcome.search_disabled_reason {
            let _ = self.events.send(ChatEvent::Notice {
                notice: Notice::SearchDisabled {
                    reason: reason.clone(),
                },
            });
        }

        if let Some(StreamFailure::Quota { message }) = &outcome.failure {
            // The open turn's content stands; re-validate to pick up the
            // real remaining count.
            let _ = self.events.send(ChatEvent::Notice {
                notice: Notice::QuotaExhausted {
                    message: message.clone(),
                },
            });
            self.refresh_quota(token).await;
        } else if outcome.state == SessionState::Completed {
            self.refresh_quota(token).await;
        }

        let _ = self.events.send(ChatEvent::StreamFinished {
            turn_id: turn_id.to_string(),
            state: outcome.state,
        });
    }

    async fn refresh_quota(&self, token: &str) {
        match self.backend.validate_token(token).await {
            Ok(auth) => {
                let remaining = auth.remaining_quota;
                self.ctx.update(auth);
                let _ = self.events.send(ChatEvent::QuotaUpdated { remaining });
            }
            Err(err) => tracing::warn!("quota re-validation failed: {err}"),
        }
    }
}

fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
