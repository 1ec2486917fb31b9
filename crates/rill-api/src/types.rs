//! Core types for the conversation transcript

use serde::{Deserialize, Serialize};

/// Models exposed by the chat backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatModel {
    /// General vision model; the only one that supports web search while
    /// deep mode is active
    #[serde(rename = "doubao-seed-1-6-vision")]
    SeedVision,
    /// Code-focused model
    #[serde(rename = "doubao-seed-code")]
    SeedCode,
    /// General conversation model
    #[serde(rename = "doubao-seed-1-6")]
    Seed,
}

impl ChatModel {
    /// All selectable models
    pub fn all() -> [ChatModel; 3] {
        [ChatModel::SeedVision, ChatModel::SeedCode, ChatModel::Seed]
    }

    /// The identifier sent on the wire
    pub fn wire_id(&self) -> &'static str {
        match self {
            ChatModel::SeedVision => "doubao-seed-1-6-vision",
            ChatModel::SeedCode => "doubao-seed-code",
            ChatModel::Seed => "doubao-seed-1-6",
        }
    }

    /// Whether this model supports web search simultaneously with deep mode
    pub fn supports_search_with_thinking(&self) -> bool {
        matches!(self, ChatModel::SeedVision)
    }

    /// Parse a wire identifier
    pub fn parse(s: &str) -> Option<ChatModel> {
        ChatModel::all().into_iter().find(|m| m.wire_id() == s)
    }
}

/// Request mode: deep reasoning or fast answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Deep,
    Fast,
}

impl ChatMode {
    /// Parse a mode name
    pub fn parse(s: &str) -> Option<ChatMode> {
        match s.to_lowercase().as_str() {
            "deep" => Some(ChatMode::Deep),
            "fast" => Some(ChatMode::Fast),
            _ => None,
        }
    }
}

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// An image attached to a user turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// Opaque unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Data reference sent on the wire (a data URL)
    pub data_url: String,
}

impl ImageAttachment {
    /// Create an attachment with a fresh id
    pub fn new(name: impl Into<String>, data_url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            data_url: data_url.into(),
        }
    }
}

/// Metadata for a document attached to a user turn. The raw content is sent
/// once in the request and not retained for replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocAttachment {
    pub name: String,
    pub mime_type: String,
}

/// A document pending send, with its raw content still present
#[derive(Debug, Clone)]
pub struct DocPayload {
    pub name: String,
    pub mime_type: String,
    pub content_base64: String,
}

impl DocPayload {
    /// The metadata retained on the turn after sending
    pub fn metadata(&self) -> DocAttachment {
        DocAttachment {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// One message in the transcript.
///
/// Ids are assigned at creation and stable for the turn's lifetime. User
/// turns are fixed at creation; assistant turns grow in place while a
/// stream session applies deltas to them. Answer text and reasoning text
/// accumulate on independent channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub text: String,
    /// Accumulated thinking content, assistant-only
    pub reasoning: Option<String>,
    /// Whether reasoning is surfaced for this turn; fixed at creation
    pub thinking_enabled: bool,
    pub images: Vec<ImageAttachment>,
    pub attached_docs: Vec<DocAttachment>,
    /// Set once a complete reasoning block arrived; later reasoning deltas
    /// are ignored
    #[serde(skip)]
    reasoning_done: bool,
}

impl Turn {
    /// Create a user turn
    pub fn user(
        text: impl Into<String>,
        images: Vec<ImageAttachment>,
        attached_docs: Vec<DocAttachment>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            text: text.into(),
            reasoning: None,
            thinking_enabled: false,
            images,
            attached_docs,
            reasoning_done: false,
        }
    }

    /// Create an empty assistant turn, open for streaming
    pub fn assistant(thinking_enabled: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            text: String::new(),
            reasoning: None,
            thinking_enabled,
            images: Vec::new(),
            attached_docs: Vec::new(),
            reasoning_done: false,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Append an answer delta. Always additive.
    pub fn push_answer(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    /// Append a reasoning delta. Ignored once a complete reasoning block
    /// has been applied.
    pub fn push_reasoning(&mut self, delta: &str) {
        if self.reasoning_done {
            return;
        }
        self.reasoning.get_or_insert_with(String::new).push_str(delta);
    }

    /// Apply a complete reasoning block. First-wins: a no-op when any
    /// reasoning content has already accumulated.
    pub fn finish_reasoning(&mut self, reasoning: &str) {
        if self.reasoning.as_deref().is_some_and(|r| !r.is_empty()) {
            return;
        }
        self.reasoning = Some(reasoning.to_string());
        self.reasoning_done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_deltas_concatenate() {
        let mut turn = Turn::assistant(false);
        turn.push_answer("He");
        turn.push_answer("llo");
        assert_eq!(turn.text, "Hello");
    }

    #[test]
    fn test_reasoning_deltas_concatenate() {
        let mut turn = Turn::assistant(true);
        turn.push_reasoning("step ");
        turn.push_reasoning("one");
        assert_eq!(turn.reasoning.as_deref(), Some("step one"));
    }

    #[test]
    fn test_reasoning_final_ignored_after_deltas() {
        let mut turn = Turn::assistant(true);
        turn.push_reasoning("partial");
        turn.finish_reasoning("complete block");
        assert_eq!(turn.reasoning.as_deref(), Some("partial"));
    }

    #[test]
    fn test_reasoning_deltas_ignored_after_final() {
        let mut turn = Turn::assistant(true);
        turn.finish_reasoning("complete block");
        turn.push_reasoning(" extra");
        assert_eq!(turn.reasoning.as_deref(), Some("complete block"));
    }

    #[test]
    fn test_reasoning_final_applies_when_empty() {
        let mut turn = Turn::assistant(true);
        turn.finish_reasoning("done");
        assert_eq!(turn.reasoning.as_deref(), Some("done"));
    }

    #[test]
    fn test_model_parse_round_trip() {
        for model in ChatModel::all() {
            assert_eq!(ChatModel::parse(model.wire_id()), Some(model));
        }
        assert_eq!(ChatModel::parse("gpt-4"), None);
    }

    #[test]
    fn test_only_vision_model_supports_search() {
        assert!(ChatModel::SeedVision.supports_search_with_thinking());
        assert!(!ChatModel::SeedCode.supports_search_with_thinking());
        assert!(!ChatModel::Seed.supports_search_with_thinking());
    }
}
