//! Chat message shape accepted from callers and forwarded upstream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One role/content pair of a conversation.
///
/// Roles are forwarded as given; the upstream decides which roles it accepts.
/// Provider-specific siblings of `role`/`content` (e.g. `name`, `tool_calls`)
/// are kept in `extra` and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_content(MessageRole::System, MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_content(MessageRole::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_content(MessageRole::Assistant, MessageContent::Text(text.into()))
    }

    pub fn with_content(role: MessageRole, content: MessageContent) -> Self {
        Self {
            role: role.as_str().to_string(),
            content,
            extra: Map::new(),
        }
    }
}

/// Well-known roles, for constructing messages in code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// Message content (can be string or array of content blocks)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<Value>),
    /// Explicit `null`, used by assistant turns that only carry tool calls.
    Null,
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Null
    }
}
