//! Request construction for the chat endpoint
//!
//! The builder converts the transcript plus the pending user turn into the
//! wire body. Content-shape and web-search policy are enforced here, not in
//! a rendering layer: they are correctness invariants of the request.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{ChatMode, ChatModel, DocPayload, Role, Turn};

/// Maximum number of detected URLs forwarded as a hint list
pub const MAX_URLS: usize = 3;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)https?://\S+").unwrap());

/// Options fixed at send time
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    pub model: ChatModel,
    pub mode: ChatMode,
    pub web_search: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            model: ChatModel::SeedVision,
            mode: ChatMode::Deep,
            web_search: false,
        }
    }
}

/// Wire request body for the chat endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub model: ChatModel,
    pub mode: ChatMode,
    pub web_search: bool,
    pub conversation_id: String,
    pub stream: bool,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FilePayload>>,
}

/// One message on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: WireContent,
}

/// Message content: a plain string, or a typed part list for user turns
/// that carry images. The history store returns the same shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// A document payload sent once with the request
#[derive(Debug, Clone, Serialize)]
pub struct FilePayload {
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64-encoded raw content
    pub content: String,
}

/// Build the wire request for one send.
///
/// `history` is the transcript as it stood before this send; `user_turn` is
/// the new turn being submitted. Web search is permitted only when the
/// model supports it alongside deep mode, and is force-disabled when the
/// pending turn carries images — the server explains the downgrade through
/// a response header rather than the flag being dropped silently.
pub fn build_chat_request(
    conversation_id: &str,
    history: &[Turn],
    user_turn: &Turn,
    docs: &[DocPayload],
    options: &SendOptions,
) -> ChatRequest {
    let web_search = options.web_search
        && options.model.supports_search_with_thinking()
        && user_turn.images.is_empty();

    let mut messages: Vec<WireMessage> = history.iter().map(wire_message).collect();
    messages.push(wire_message(user_turn));

    let urls = extract_urls(&user_turn.text);
    let files: Vec<FilePayload> = docs
        .iter()
        .map(|doc| FilePayload {
            name: doc.name.clone(),
            mime_type: doc.mime_type.clone(),
            content: doc.content_base64.clone(),
        })
        .collect();

    ChatRequest {
        model: options.model,
        mode: options.mode,
        web_search,
        conversation_id: conversation_id.to_string(),
        stream: true,
        messages,
        urls: (!urls.is_empty()).then_some(urls),
        files: (!files.is_empty()).then_some(files),
    }
}

fn wire_message(turn: &Turn) -> WireMessage {
    match turn.role {
        // Assistant history is replayed as plain text only; images are
        // never sent upstream for prior assistant turns.
        Role::Assistant => WireMessage {
            role: Role::Assistant,
            content: WireContent::Text(turn.text.clone()),
        },
        Role::User if turn.images.is_empty() => WireMessage {
            role: Role::User,
            content: WireContent::Text(turn.text.clone()),
        },
        Role::User => {
            let mut parts = Vec::new();
            if !turn.text.trim().is_empty() {
                parts.push(ContentPart::Text {
                    text: turn.text.clone(),
                });
            }
            for image in &turn.images {
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_url.clone(),
                    },
                });
            }
            WireMessage {
                role: Role::User,
                content: WireContent::Parts(parts),
            }
        }
    }
}

/// Extract up to [`MAX_URLS`] distinct URLs from free text, in first-seen
/// order. URLs are de-duplicated on a normalized form with trailing
/// punctuation stripped; extras beyond the bound are silently omitted.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for found in URL_RE.find_iter(text) {
        let normalized = found
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?', ')'])
            .to_string();
        if normalized.is_empty() || !seen.insert(normalized.clone()) {
            continue;
        }
        urls.push(normalized);
        if urls.len() == MAX_URLS {
            break;
        }
    }
    urls
}
