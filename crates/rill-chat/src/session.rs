//! Stream session: one in-flight chat request
//!
//! A session owns one transport request from open to a single terminal
//! state. Parser events are applied to the open assistant turn as they
//! arrive; the loop suspends only while waiting for the next chunk, which
//! is also where cancellation is observed.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use rill_api::{
    ChatRequest, DeltaParser,
    sse::DeltaEvent,
};

use crate::{backend::Backend, transcript::TranscriptStore};

/// Lifecycle states of a stream session. The terminal states are disjoint;
/// each session reaches exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Opening,
    Streaming,
    Completed,
    Aborted,
    Failed,
}

/// Classified cause for a failed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    /// Distinguished 403: the open turn's content is left untouched and
    /// the caller re-validates the quota
    Quota { message: String },
    /// Non-ok response status
    Status { code: u16, message: String },
    /// Network or body-read error
    Network { message: String },
}

impl std::fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamFailure::Quota { message } => write!(f, "quota exhausted: {message}"),
            StreamFailure::Status { code, message } => write!(f, "status {code}: {message}"),
            StreamFailure::Network { message } => write!(f, "network error: {message}"),
        }
    }
}

/// Terminal result of a session run
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub failure: Option<StreamFailure>,
    /// Conversation id echoed by the server, to be adopted going forward
    pub conversation_id: Option<String>,
    /// Server hint for why web search was disabled
    pub search_disabled_reason: Option<String>,
}

/// One in-flight chat request targeting one assistant turn.
///
/// At most one session may be active per conversation; the controller
/// enforces that, not the session itself.
pub struct StreamSession {
    target_turn_id: String,
    cancel: CancellationToken,
    state: SessionState,
}

impl StreamSession {
    pub fn new(target_turn_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            target_turn_id: target_turn_id.into(),
            cancel,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to a terminal state, applying parser events to the
    /// open assistant turn as they arrive.
    pub async fn run(
        &mut self,
        backend: &dyn Backend,
        token: &str,
        request: &ChatRequest,
        store: &TranscriptStore,
    ) -> SessionOutcome {
        self.state = SessionState::Opening;

        let stream = match backend.open_chat(token, request).await {
            Ok(stream) => stream,
            Err(err) => return self.fail(store, classify(err), None, None),
        };

        let conversation_id = stream.conversation_id;
        let search_disabled_reason = stream.search_disabled_reason;
        let mut body = stream.body;

        self.state = SessionState::Streaming;
        let mut parser = DeltaParser::new();

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => {
                    // Already-applied partial content stands as the final
                    // content for this turn; no error text is written.
                    self.state = SessionState::Aborted;
                    return SessionOutcome {
                        state: self.state,
                        failure: None,
                        conversation_id,
                        search_disabled_reason,
                    };
                }
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => self.apply(store, parser.feed(&bytes)),
                Some(Err(err)) => {
                    return self.fail(
                        store,
                        classify(err),
                        conversation_id,
                        search_disabled_reason,
                    );
                }
                None => {
                    self.apply(store, parser.finish());
                    self.state = SessionState::Completed;
                    return SessionOutcome {
                        state: self.state,
                        failure: None,
                        conversation_id,
                        search_disabled_reason,
                    };
                }
            }
        }
    }

    fn apply(&self, store: &TranscriptStore, events: Vec<DeltaEvent>) {
        for event in events {
            match event {
                DeltaEvent::Answer(delta) => {
                    store.update(&self.target_turn_id, |turn| turn.push_answer(&delta));
                }
                DeltaEvent::Reasoning(delta) => {
                    store.update(&self.target_turn_id, |turn| turn.push_reasoning(&delta));
                }
                DeltaEvent::ReasoningFinal(reasoning) => {
                    store.update(&self.target_turn_id, |turn| turn.finish_reasoning(&reasoning));
                }
                DeltaEvent::Malformed(raw) => {
                    tracing::warn!(turn_id = %self.target_turn_id, "skipping malformed stream record: {raw}");
                }
            }
        }
    }

    fn fail(
        &mut self,
        store: &TranscriptStore,
        failure: StreamFailure,
        conversation_id: Option<String>,
        search_disabled_reason: Option<String>,
    ) -> SessionOutcome {
        self.state = SessionState::Failed;
        if !matches!(failure, StreamFailure::Quota { .. }) {
            // Partial content is not preserved on failure; the turn carries
            // the classified cause instead.
            store.update(&self.target_turn_id, |turn| {
                turn.text = format!("Request failed: {failure}");
            });
        }
        SessionOutcome {
            state: self.state,
            failure: Some(failure),
            conversation_id,
            search_disabled_reason,
        }
    }
}

fn classify(err: rill_api::Error) -> StreamFailure {
    match err {
        rill_api::Error::QuotaExhausted { message } => StreamFailure::Quota { message },
        rill_api::Error::Api { status, message } => StreamFailure::Status {
            code: status,
            message,
        },
        other => StreamFailure::Network {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rill_api::client::ByteStream;
    use rill_api::{
        AuthSession, ChatStream, Error as ApiError, HistoryEntry, SendOptions, StoredMessage,
        Turn, build_chat_request,
    };

    /// What the mock chat endpoint should do when opened
    enum Reply {
        /// Stream the given chunks, then end
        Chunks(Vec<Vec<u8>>),
        /// Stream the given chunks, then stay open until cancelled
        ChunksThenHang(Vec<Vec<u8>>),
        /// Fail the open with a quota-exhausted 403
        Quota(&'static str),
        /// Fail the open with a non-ok status
        Status(u16, &'static str),
    }

    struct MockBackend {
        reply: Reply,
        conversation_id: Option<String>,
        search_disabled_reason: Option<String>,
    }

    impl MockBackend {
        fn chunks(chunks: Vec<&str>) -> Self {
            Self {
                reply: Reply::Chunks(chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect()),
                conversation_id: None,
                search_disabled_reason: None,
            }
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn open_chat(
            &self,
            _token: &str,
            _request: &ChatRequest,
        ) -> rill_api::Result<ChatStream> {
            let as_results = |chunks: &[Vec<u8>]| -> Vec<rill_api::Result<Vec<u8>>> {
                chunks.iter().cloned().map(Ok).collect()
            };
            let body: ByteStream = match &self.reply {
                Reply::Chunks(chunks) => {
                    Box::pin(futures::stream::iter(as_results(chunks)))
                }
                Reply::ChunksThenHang(chunks) => Box::pin(
                    futures::stream::iter(as_results(chunks))
                        .chain(futures::stream::pending()),
                ),
                Reply::Quota(message) => {
                    return Err(ApiError::QuotaExhausted {
                        message: (*message).to_string(),
                    });
                }
                Reply::Status(code, message) => {
                    return Err(ApiError::api(*code, *message));
                }
            };
            Ok(ChatStream {
                conversation_id: self.conversation_id.clone(),
                search_disabled_reason: self.search_disabled_reason.clone(),
                body,
            })
        }

        async fn validate_token(&self, _token: &str) -> rill_api::Result<AuthSession> {
            unreachable!("session tests never validate tokens")
        }

        async fn history_list(&self, _token: &str) -> rill_api::Result<Vec<HistoryEntry>> {
            Ok(vec![])
        }

        async fn history_detail(
            &self,
            _token: &str,
            _conversation_id: &str,
        ) -> rill_api::Result<Vec<StoredMessage>> {
            Ok(vec![])
        }

        async fn history_rename(
            &self,
            _token: &str,
            _conversation_id: &str,
            _title: &str,
        ) -> rill_api::Result<()> {
            Ok(())
        }

        async fn history_delete(
            &self,
            _token: &str,
            _conversation_id: &str,
        ) -> rill_api::Result<()> {
            Ok(())
        }
    }

    fn open_turn(store: &TranscriptStore) -> String {
        let turn = Turn::assistant(true);
        let id = turn.id.clone();
        store.append(turn);
        id
    }

    fn request() -> ChatRequest {
        let user = Turn::user("hi", vec![], vec![]);
        build_chat_request("conv-1", &[], &user, &[], &SendOptions::default())
    }

    #[tokio::test]
    async fn test_deltas_accumulate_and_complete() {
        let store = TranscriptStore::new();
        let turn_id = open_turn(&store);
        let backend = MockBackend::chunks(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n",
            "data: [DONE]\n",
        ]);

        let mut session = StreamSession::new(&turn_id, CancellationToken::new());
        let outcome = session.run(&backend, "token", &request(), &store).await;

        assert_eq!(outcome.state, SessionState::Completed);
        assert!(outcome.failure.is_none());
        assert_eq!(store.snapshot().turn(&turn_id).unwrap().text, "Hello");
    }

    #[tokio::test]
    async fn test_record_split_across_chunks() {
        let store = TranscriptStore::new();
        let turn_id = open_turn(&store);
        let backend = MockBackend::chunks(vec![
            "da",
            "ta: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
            "data: [DONE]\n",
        ]);

        let mut session = StreamSession::new(&turn_id, CancellationToken::new());
        let outcome = session.run(&backend, "token", &request(), &store).await;

        assert_eq!(outcome.state, SessionState::Completed);
        assert_eq!(store.snapshot().turn(&turn_id).unwrap().text, "Hi");
    }

    #[tokio::test]
    async fn test_reasoning_channel_accumulates_independently() {
        let store = TranscriptStore::new();
        let turn_id = open_turn(&store);
        let backend = MockBackend::chunks(vec![
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"think \"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"hard\",\"content\":\"Hi\"}}]}\n",
            "data: {\"reasoning\":\"late full block\"}\n",
            "data: [DONE]\n",
        ]);

        let mut session = StreamSession::new(&turn_id, CancellationToken::new());
        session.run(&backend, "token", &request(), &store).await;

        let snapshot = store.snapshot();
        let turn = snapshot.turn(&turn_id).unwrap();
        assert_eq!(turn.text, "Hi");
        // The terminal reasoning record lost to the accumulated deltas.
        assert_eq!(turn.reasoning.as_deref(), Some("think hard"));
    }

    #[tokio::test]
    async fn test_reasoning_final_first_wins() {
        let store = TranscriptStore::new();
        let turn_id = open_turn(&store);
        let backend = MockBackend::chunks(vec![
            "data: {\"reasoning\":\"complete block\"}\n",
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"ignored\"}}]}\n",
            "data: [DONE]\n",
        ]);

        let mut session = StreamSession::new(&turn_id, CancellationToken::new());
        session.run(&backend, "token", &request(), &store).await;

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.turn(&turn_id).unwrap().reasoning.as_deref(),
            Some("complete block")
        );
    }

    #[tokio::test]
    async fn test_malformed_record_does_not_abort() {
        let store = TranscriptStore::new();
        let turn_id = open_turn(&store);
        let backend = MockBackend::chunks(vec![
            "data: {broken\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        ]);

        let mut session = StreamSession::new(&turn_id, CancellationToken::new());
        let outcome = session.run(&backend, "token", &request(), &store).await;

        assert_eq!(outcome.state, SessionState::Completed);
        assert_eq!(store.snapshot().turn(&turn_id).unwrap().text, "ok");
    }

    #[tokio::test]
    async fn test_quota_failure_leaves_turn_untouched() {
        let store = TranscriptStore::new();
        let turn_id = open_turn(&store);
        let backend = MockBackend {
            reply: Reply::Quota("quota exceeded"),
            conversation_id: None,
            search_disabled_reason: None,
        };

        let mut session = StreamSession::new(&turn_id, CancellationToken::new());
        let outcome = session.run(&backend, "token", &request(), &store).await;

        assert_eq!(outcome.state, SessionState::Failed);
        assert_eq!(
            outcome.failure,
            Some(StreamFailure::Quota {
                message: "quota exceeded".into()
            })
        );
        // No error text is written over the open turn.
        assert_eq!(store.snapshot().turn(&turn_id).unwrap().text, "");
    }

    #[tokio::test]
    async fn test_status_failure_overwrites_turn_text() {
        let store = TranscriptStore::new();
        let turn_id = open_turn(&store);
        let backend = MockBackend {
            reply: Reply::Status(502, "bad gateway"),
            conversation_id: None,
            search_disabled_reason: None,
        };

        let mut session = StreamSession::new(&turn_id, CancellationToken::new());
        let outcome = session.run(&backend, "token", &request(), &store).await;

        assert_eq!(outcome.state, SessionState::Failed);
        let snapshot = store.snapshot();
        let text = &snapshot.turn(&turn_id).unwrap().text;
        assert!(text.starts_with("Request failed:"), "got: {text}");
        assert!(text.contains("502"), "got: {text}");
    }

    #[tokio::test]
    async fn test_cancel_preserves_partial_content() {
        let store = TranscriptStore::new();
        let turn_id = open_turn(&store);
        let backend = MockBackend {
            reply: Reply::ChunksThenHang(vec![
                b"data: {\"choices\":[{\"delta\":{\"content\":\"Par\"}}]}\n".to_vec(),
            ]),
            conversation_id: None,
            search_disabled_reason: None,
        };

        let cancel = CancellationToken::new();
        let mut session = StreamSession::new(&turn_id, cancel.clone());
        let request = request();
        let run_store = store.clone();
        let mut rx = store.subscribe();
        let task = tokio::spawn(async move {
            session.run(&backend, "token", &request, &run_store).await
        });

        // Stop only after the first delta has been applied.
        rx.wait_for(|t| t.turn(&turn_id).is_some_and(|turn| turn.text == "Par"))
            .await
            .unwrap();
        cancel.cancel();

        let outcome = task.await.unwrap();
        assert_eq!(outcome.state, SessionState::Aborted);
        assert!(outcome.failure.is_none());
        assert_eq!(store.snapshot().turn(&turn_id).unwrap().text, "Par");
    }

    #[tokio::test]
    async fn test_header_echoes_surface_in_outcome() {
        let store = TranscriptStore::new();
        let turn_id = open_turn(&store);
        let backend = MockBackend {
            reply: Reply::Chunks(vec![b"data: [DONE]\n".to_vec()]),
            conversation_id: Some("server-conv".into()),
            search_disabled_reason: Some("image".into()),
        };

        let mut session = StreamSession::new(&turn_id, CancellationToken::new());
        let outcome = session.run(&backend, "token", &request(), &store).await;

        assert_eq!(outcome.conversation_id.as_deref(), Some("server-conv"));
        assert_eq!(outcome.search_disabled_reason.as_deref(), Some("image"));
    }

    #[tokio::test]
    async fn test_unterminated_final_line_is_applied() {
        let store = TranscriptStore::new();
        let turn_id = open_turn(&store);
        let backend = MockBackend::chunks(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}",
        ]);

        let mut session = StreamSession::new(&turn_id, CancellationToken::new());
        let outcome = session.run(&backend, "token", &request(), &store).await;

        assert_eq!(outcome.state, SessionState::Completed);
        assert_eq!(store.snapshot().turn(&turn_id).unwrap().text, "tail");
    }
}
