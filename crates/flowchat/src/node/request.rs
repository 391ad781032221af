//! Node configuration and per-execution inputs.
//!
//! [`ChatNodeParams`] is what the workflow author configured on the node.
//! [`NodeInvocation`] carries what the engine knows at run time (history,
//! stream flag, routing ids). Together they form the immutable
//! [`NodeExecutionRequest`] handed to the executor.
//!
//! ```
//! use flowchat::node::{ChatNodeParams, NodeExecutionRequest, NodeInvocation};
//! use flowchat::history::StoredChatRecord;
//!
//! let params = ChatNodeParams::new("gpt", "{{question}}")
//!     .with_system("You answer in French.")
//!     .with_dialogue_number(2);
//! let invocation = NodeInvocation::new("chat-1", "record-9")
//!     .with_stream(true)
//!     .with_history([StoredChatRecord::new("hi", "salut")]);
//!
//! let request = NodeExecutionRequest::from_parts(&params, invocation);
//! assert!(request.stream);
//! assert_eq!(request.history.len(), 1);
//! ```

use crate::ChatNodeError;
use crate::history::ChatRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Parameters configured on a chat node.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatNodeParams {
    /// Model record id, resolved through the [`ModelProvider`](crate::model::ModelProvider).
    pub model_id: String,
    /// System instruction. Blank is allowed.
    #[serde(default)]
    pub system: Option<String>,
    /// Prompt template, resolved through the [`PromptResolver`](crate::prompt::PromptResolver).
    pub prompt: String,
    /// Number of most recent chat records sent as history.
    pub dialogue_number: i64,
}

impl ChatNodeParams {
    /// Params with no system instruction and no history.
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            system: None,
            prompt: prompt.into(),
            dialogue_number: 0,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_dialogue_number(mut self, dialogue_number: i64) -> Self {
        self.dialogue_number = dialogue_number;
        self
    }

    /// Parse and validate params from a node's JSON config.
    pub fn from_value(config: &serde_json::Value) -> Result<Self, ChatNodeError> {
        let params: Self = serde_json::from_value(config.clone())
            .map_err(|e| ChatNodeError::Configuration(format!("invalid chat node params: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    /// `model_id` and `prompt` are required and must not be blank.
    pub fn validate(&self) -> Result<(), ChatNodeError> {
        if self.model_id.trim().is_empty() {
            return Err(ChatNodeError::Configuration("model_id is required".into()));
        }
        if self.prompt.trim().is_empty() {
            return Err(ChatNodeError::Configuration("prompt is required".into()));
        }
        Ok(())
    }
}

/// Routing identifiers of the chat turn being answered.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Routing {
    pub session_id: String,
    pub record_id: String,
}

impl Routing {
    pub fn new(session_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            record_id: record_id.into(),
        }
    }
}

/// Run-time inputs supplied by the workflow engine.
#[derive(Clone)]
pub struct NodeInvocation {
    pub history: Vec<Arc<dyn ChatRecord>>,
    pub stream: bool,
    pub routing: Routing,
}

impl NodeInvocation {
    /// Buffered invocation with no history.
    pub fn new(session_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            history: Vec::new(),
            stream: false,
            routing: Routing::new(session_id, record_id),
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Append chat records, oldest first.
    pub fn with_history<R, I>(mut self, records: I) -> Self
    where
        R: ChatRecord + 'static,
        I: IntoIterator<Item = R>,
    {
        self.history.extend(
            records
                .into_iter()
                .map(|r| Arc::new(r) as Arc<dyn ChatRecord>),
        );
        self
    }

    /// Use already shared records, oldest first.
    pub fn with_records(mut self, records: Vec<Arc<dyn ChatRecord>>) -> Self {
        self.history = records;
        self
    }
}

/// Everything one execution needs. Not modified once built.
#[derive(Clone)]
pub struct NodeExecutionRequest {
    pub model_id: String,
    pub system: Option<String>,
    pub prompt: String,
    pub dialogue_number: i64,
    pub history: Vec<Arc<dyn ChatRecord>>,
    pub stream: bool,
    pub routing: Routing,
}

impl NodeExecutionRequest {
    pub fn from_parts(params: &ChatNodeParams, invocation: NodeInvocation) -> Self {
        Self {
            model_id: params.model_id.clone(),
            system: params.system.clone(),
            prompt: params.prompt.clone(),
            dialogue_number: params.dialogue_number,
            history: invocation.history,
            stream: invocation.stream,
            routing: invocation.routing,
        }
    }
}

/// Generate a unique id for a chat session or record.
pub fn generate_id(prefix: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter keeps ids unique within the same nanosecond.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{ts:x}-{count:04x}")
}
