//! rill-api: Wire layer for the rill chat client
//!
//! This crate provides the conversation data model, the streaming delta
//! parser, the request builder, and the HTTP client for the chat backend,
//! history store, and identity endpoint.

pub mod client;
pub mod error;
pub mod request;
pub mod sse;
pub mod types;

pub use client::{AuthSession, ChatClient, ChatStream, HistoryEntry, StoredMessage};
pub use error::{Error, Result};
pub use request::{ChatRequest, SendOptions, build_chat_request};
pub use sse::{DeltaEvent, DeltaParser};
pub use types::*;
