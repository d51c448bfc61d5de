//! Chat-boundary message types.
//!
//! `Message` is the wire shape sent to the chat-completion provider: system
//! prompt, user input, assistant replies (optionally carrying tool calls), and
//! tool results tied to a call id. Durable conversation history uses
//! [`HistoryMessage`](crate::state::HistoryMessage) instead; the two meet in
//! the orchestrator.

use serde::{Deserialize, Serialize};

use crate::state::ToolCall;

/// A single message in a provider conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// System prompt; typically first in the list.
    System(String),
    /// User input.
    User(String),
    /// Assistant reply (plain text).
    Assistant(String),
    /// Assistant turn that requested tool calls; echoed back to the provider
    /// so the following Tool messages have their antecedent.
    AssistantToolCalls {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    /// Result of one tool execution, tied to the originating call id.
    Tool { call_id: String, content: String },
}

impl Message {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(content.into())
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(content.into())
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(content.into())
    }

    /// Creates a tool-result message for the given call id.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            call_id: call_id.into(),
            content: content.into(),
        }
    }

    /// Text content of this message regardless of variant.
    pub fn content_text(&self) -> &str {
        match self {
            Message::System(s) | Message::User(s) | Message::Assistant(s) => s,
            Message::AssistantToolCalls { content, .. } => content,
            Message::Tool { content, .. } => content,
        }
    }
}
