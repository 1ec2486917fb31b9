//! Backend abstraction over the remote collaborators

use async_trait::async_trait;
use rill_api::{
    AuthSession, ChatClient, ChatRequest, ChatStream, HistoryEntry, Result, StoredMessage,
};

/// The remote surface the controller talks to: the inference endpoint, the
/// history store, and the identity/quota endpoint. The seam exists so the
/// session and controller are testable without a network.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open a streaming chat request
    async fn open_chat(&self, token: &str, request: &ChatRequest) -> Result<ChatStream>;

    /// Validate a token, returning identity and remaining quota
    async fn validate_token(&self, token: &str) -> Result<AuthSession>;

    /// Fetch the conversation list
    async fn history_list(&self, token: &str) -> Result<Vec<HistoryEntry>>;

    /// Fetch one conversation's stored messages
    async fn history_detail(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>>;

    /// Rename a conversation
    async fn history_rename(&self, token: &str, conversation_id: &str, title: &str) -> Result<()>;

    /// Delete a conversation
    async fn history_delete(&self, token: &str, conversation_id: &str) -> Result<()>;
}

#[async_trait]
impl Backend for ChatClient {
    async fn open_chat(&self, token: &str, request: &ChatRequest) -> Result<ChatStream> {
        ChatClient::open_chat(self, token, request).await
    }

    async fn validate_token(&self, token: &str) -> Result<AuthSession> {
        ChatClient::validate_token(self, token).await
    }

    async fn history_list(&self, token: &str) -> Result<Vec<HistoryEntry>> {
        ChatClient::history_list(self, token).await
    }

    async fn history_detail(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>> {
        ChatClient::history_detail(self, token, conversation_id).await
    }

    async fn history_rename(&self, token: &str, conversation_id: &str, title: &str) -> Result<()> {
        ChatClient::history_rename(self, token, conversation_id, title).await
    }

    async fn history_delete(&self, token: &str, conversation_id: &str) -> Result<()> {
        ChatClient::history_delete(self, token, conversation_id).await
    }
}
