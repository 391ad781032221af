//! Convenience re-exports for common `flowchat` types.
//!
//! ```ignore
//! use flowchat::prelude::*;
//! ```
//!
//! Covers running a node end to end: models and the registry, the node and
//! executor, history records and response delivery. Token estimation and
//! SSE parsing internals stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatNodeError, Message, MessageChunk, MessageRole};

// ── Models ──────────────────────────────────────────────────────────
pub use crate::model::{ModelClient, ModelProvider, ModelRegistry, OpenRouterClient, ScriptedModel};

// ── History and prompts ─────────────────────────────────────────────
pub use crate::history::{ChatRecord, StoredChatRecord, load_records};
pub use crate::prompt::{FnPromptResolver, IdentityResolver, PromptResolver};

// ── Node runtime ────────────────────────────────────────────────────
pub use crate::node::{
    ChatNode, ChatNodeExecutor, ChatNodeParams, CollectingSink, FnPostHandler, NodeContext,
    NodeDetails, NodeInvocation, NodeResponse, NodeResult, NoopPostHandler, PostHandler,
    ResponseFragment, ResponseSink, SseSink, deliver,
};
