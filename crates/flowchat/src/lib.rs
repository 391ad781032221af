//! Chat step node for multi-node conversational workflows.
//!
//! `flowchat` implements one workflow step: call a chat model, either
//! buffered or streamed, and record the exchange into a per-node context
//! that downstream nodes and the response pipeline read. The same node
//! works whether the model returns a single [`Message`] or a lazy stream of
//! [`MessageChunk`]s, and the bookkeeping (token accounting, history window,
//! final context) happens exactly once, after the output is consumed.
//!
//! # Getting started
//!
//! ```ignore
//! use flowchat::prelude::*;
//! use std::sync::Arc;
//!
//! let mut registry = ModelRegistry::new();
//! registry.register("glm", Arc::new(OpenRouterClient::new(api_key, "z-ai/glm-5")?));
//!
//! let executor = ChatNodeExecutor::new(Arc::new(registry));
//! let params = ChatNodeParams::new("glm", "Summarize the ticket.").with_dialogue_number(3);
//! let mut node = ChatNode::new("chat-1", params);
//!
//! let result = node
//!     .run(&executor, NodeInvocation::new("session-1", "record-1").with_stream(true))
//!     .await?;
//! let response = result.into_response(Arc::new(NoopPostHandler));
//! deliver(response, &mut SseSink::new(std::io::stdout())).await?;
//!
//! println!("{}", serde_json::to_string_pretty(&node.details(0)?)?);
//! ```
//!
//! # Where to find things
//!
//! - **Run a node:** [`ChatNode`](node::ChatNode) and
//!   [`ChatNodeExecutor`](node::ChatNodeExecutor). The executor returns a
//!   [`NodeResult`](node::NodeResult); turn it into a response with
//!   [`NodeResult::into_response`](node::NodeResult::into_response) or just
//!   commit with [`NodeResult::write_context`](node::NodeResult::write_context).
//! - **Plug in a model:** implement [`ModelClient`](model::ModelClient) and
//!   register it in a [`ModelRegistry`](model::ModelRegistry).
//! - **Feed history:** implement [`ChatRecord`](history::ChatRecord), or use
//!   [`StoredChatRecord`](history::StoredChatRecord).
//! - **Deliver output:** implement [`ResponseSink`](node::ResponseSink) and
//!   [`PostHandler`](node::PostHandler).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`node`] | Executor, response adapters, context writer, detail projection |
//! | [`model`] | Model client trait, registry, OpenRouter and scripted clients |
//! | [`history`] | Chat records, dialogue window, transcript helpers |
//! | [`prompt`] | Prompt resolver trait and message assembly |
//! | [`error`] | [`ChatNodeError`](error::ChatNodeError) |

pub mod error;
pub mod history;
pub mod model;
pub mod node;
pub mod prelude;
pub mod prompt;

use serde::{Deserialize, Serialize};

pub use error::ChatNodeError;

// ── Constants ──────────────────────────────────────────────────────

/// Node type reported by the detail projection.
pub const CHAT_NODE_TYPE: &str = "ai-chat-node";

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
///
/// Serializes with the OpenAI-compatible wire names (`human` becomes
/// `"user"`). Use [`MessageRole::kind`] for the transcript vocabulary.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageRole {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    Human,
    #[serde(rename = "assistant")]
    Assistant,
}

impl MessageRole {
    /// Short message type used in node details: `system`, `human` or `ai`.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::Human => "human",
            MessageRole::Assistant => "ai",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::Human => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Human,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A partial message delivered by a streaming model call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MessageChunk {
    pub content: String,
}

impl MessageChunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}
