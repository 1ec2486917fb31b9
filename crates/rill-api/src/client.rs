//! HTTP client for the chat backend, history store, and identity endpoint

use std::pin::Pin;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use crate::{
    error::{Error, Result},
    request::{ChatRequest, WireContent},
    types::Role,
};

/// Conversation-id echo header; authoritative when present
const CONVERSATION_ID_HEADER: &str = "x-conversation-id";
/// Hint header explaining a server-side web-search downgrade (e.g. "image")
const SEARCH_DISABLED_HEADER: &str = "x-search-disabled-reason";

/// Raw response body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// An open streaming chat response
pub struct ChatStream {
    /// Conversation id echoed by the server; adopted going forward
    pub conversation_id: Option<String>,
    /// Why web search was disabled for this request, if it was
    pub search_disabled_reason: Option<String>,
    pub body: ByteStream,
}

/// Authenticated identity and remaining quota, from token validation
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub username: String,
    pub email: String,
    #[serde(rename = "remainingQuota", default)]
    pub remaining_quota: i64,
}

/// One conversation in the remote history list. Order is server-defined
/// and treated as opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    pub title: String,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// A message as stored by the history endpoint: plain-string content or
/// the same typed part list used in requests
#[derive(Debug, Clone, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: WireContent,
}

/// Standard response envelope for the identity endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct HistoryListBody {
    #[serde(default)]
    conversations: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct HistoryDetailBody {
    #[serde(default)]
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    msg: Option<String>,
}

/// HTTP client for the chat backend
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    chat_url: String,
    auth_base: String,
}

impl ChatClient {
    /// Create a client for the given chat endpoint and identity base URL
    pub fn new(chat_url: impl Into<String>, auth_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            chat_url: chat_url.into(),
            auth_base: auth_base.into(),
        }
    }

    /// Open a streaming chat request.
    ///
    /// A 403 is mapped to [`Error::QuotaExhausted`]; any other non-ok
    /// status becomes [`Error::Api`]. On success the raw body chunks are
    /// handed over untouched — reassembling records across chunk
    /// boundaries is the delta parser's job.
    pub async fn open_chat(&self, token: &str, request: &ChatRequest) -> Result<ChatStream> {
        tracing::debug!("opening chat stream: {}", self.chat_url);
        let response = self
            .http
            .post(&self.chat_url)
            .header("accept", "text/event-stream")
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|body| body.msg)
                .unwrap_or(text);
            return Err(Error::QuotaExhausted { message });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), text));
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let conversation_id = header(CONVERSATION_ID_HEADER);
        let search_disabled_reason = header(SEARCH_DISABLED_HEADER);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from));

        Ok(ChatStream {
            conversation_id,
            search_disabled_reason,
            body: Box::pin(body),
        })
    }

    /// Validate a bearer token, returning identity and remaining quota
    pub async fn validate_token(&self, token: &str) -> Result<AuthSession> {
        let url = format!("{}/api/user/validate-token", self.auth_base);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await?;

        let status = response.status();
        let envelope: Envelope<AuthSession> = response.json().await?;
        if !status.is_success() || envelope.code != 200 {
            return Err(Error::Auth(envelope.msg.unwrap_or_else(|| {
                format!("token validation failed (status {})", status.as_u16())
            })));
        }
        envelope
            .data
            .ok_or_else(|| Error::UnexpectedResponse("validate-token reply missing data".into()))
    }

    /// Fetch the conversation list
    pub async fn history_list(&self, token: &str) -> Result<Vec<HistoryEntry>> {
        let url = format!("{}/history", self.chat_url);
        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let response = check_status(response).await?;
        let body: HistoryListBody = response.json().await?;
        Ok(body.conversations)
    }

    /// Fetch the stored messages of one conversation
    pub async fn history_detail(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>> {
        let url = format!(
            "{}/history?conversationId={}",
            self.chat_url,
            urlencoding::encode(conversation_id)
        );
        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let response = check_status(response).await?;
        let body: HistoryDetailBody = response.json().await?;
        Ok(body.messages)
    }

    /// Rename a conversation
    pub async fn history_rename(
        &self,
        token: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<()> {
        let url = format!("{}/history/{}", self.chat_url, conversation_id);
        let response = self
            .http
            .put(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Delete a conversation
    pub async fn history_delete(&self, token: &str, conversation_id: &str) -> Result<()> {
        let url = format!("{}/history/{}", self.chat_url, conversation_id);
        let response = self.http.delete(&url).bearer_auth(token).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(Error::api(status.as_u16(), text))
}
