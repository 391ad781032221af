//! Model client abstraction and provider resolution.
//!
//! - [`ModelClient`]: the chat model collaborator: buffered `invoke`,
//!   streamed `stream`, and tokenizer-consistent token counts.
//! - [`ModelProvider`]: resolves a model id to a constructed client.
//!   [`ModelRegistry`] is the in-memory implementation.
//! - [`openrouter`]: HTTP client for the OpenRouter chat completions API.
//! - [`scripted`]: deterministic offline client for tests and dry runs.
//! - [`tokens`]: character-based token estimation.

pub mod openrouter;
pub mod scripted;
pub mod tokens;

use crate::{ChatNodeError, Message, MessageChunk};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

pub use openrouter::OpenRouterClient;
pub use scripted::ScriptedModel;

/// Boxed future returned by [`ModelClient`] calls.
///
/// Keeps the trait dyn-compatible so clients can be shared as
/// `Arc<dyn ModelClient>`.
pub type ModelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChatNodeError>> + Send + 'a>>;

/// Forward-only, single-pass sequence of partial results.
///
/// The stream owns everything it needs; it does not borrow the message list
/// it was created from.
pub type ChunkStream = BoxStream<'static, Result<MessageChunk, ChatNodeError>>;

/// A constructed chat model client.
///
/// Clients are used read-only by the node: one call to `invoke` or `stream`
/// per execution, then token counting after the answer is known.
pub trait ModelClient: Send + Sync {
    /// Run a buffered completion and return the full assistant message.
    fn invoke<'a>(&'a self, messages: &'a [Message]) -> ModelFuture<'a, Message>;

    /// Start a streamed completion. Errors raised before the first chunk are
    /// returned here; errors after that surface as stream items.
    fn stream<'a>(&'a self, messages: &'a [Message]) -> ModelFuture<'a, ChunkStream>;

    /// Count tokens in a piece of text.
    fn count_tokens(&self, text: &str) -> usize;

    /// Count tokens over a whole outgoing message list.
    fn count_tokens_for_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_tokens(&m.content)).sum()
    }
}

/// Resolves a model id into a client.
///
/// Credential handling and client construction live behind this trait.
/// An unknown id is a [`ChatNodeError::Configuration`].
pub trait ModelProvider: Send + Sync {
    fn resolve(&self, model_id: &str) -> Result<Arc<dyn ModelClient>, ChatNodeError>;
}

/// In-memory [`ModelProvider`] keyed by model id.
#[derive(Default)]
pub struct ModelRegistry {
    clients: HashMap<String, Arc<dyn ModelClient>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the client for a model id.
    pub fn register(&mut self, model_id: impl Into<String>, client: Arc<dyn ModelClient>) {
        self.clients.insert(model_id.into(), client);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, model_id: impl Into<String>, client: Arc<dyn ModelClient>) -> Self {
        self.register(model_id, client);
        self
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.clients.contains_key(model_id)
    }

    /// Registered model ids, sorted.
    pub fn model_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.clients.keys().map(|k| k.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

impl ModelProvider for ModelRegistry {
    fn resolve(&self, model_id: &str) -> Result<Arc<dyn ModelClient>, ChatNodeError> {
        debug!("Resolving model client: {model_id}");
        self.clients.get(model_id).cloned().ok_or_else(|| {
            ChatNodeError::Configuration(format!("model not found: {model_id}"))
        })
    }
}
