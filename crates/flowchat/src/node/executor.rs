//! The chat node executor.
//!
//! [`ChatNodeExecutor::execute`] resolves the model, windows the history,
//! assembles the messages and makes exactly one model call, buffered or
//! streamed. It never consumes the model output: the returned
//! [`NodeResult`] decides how to finish, through
//! [`into_response`](NodeResult::into_response) when the answer goes to the
//! user, or [`write_context`](NodeResult::write_context) when it only feeds
//! later nodes.

use super::context::{ContextSlot, ContextWriter, NodeContext};
use super::request::{NodeExecutionRequest, Routing};
use super::response::{self, NodeResponse, PostHandler};
use crate::history::{HistoryTurn, history_window};
use crate::model::{ChunkStream, ModelClient, ModelProvider};
use crate::prompt::{IdentityResolver, PromptResolver, assemble_messages};
use crate::{ChatNodeError, Message};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Which path an execution took. Fixed once the model has been called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Buffered,
    Streamed,
}

/// Raw result of the model call.
pub enum ModelOutput {
    /// A completed assistant message.
    Message(Message),
    /// A lazy, single-pass chunk sequence.
    Chunks(ChunkStream),
}

impl ModelOutput {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            ModelOutput::Message(_) => ExecutionMode::Buffered,
            ModelOutput::Chunks(_) => ExecutionMode::Streamed,
        }
    }
}

impl std::fmt::Debug for ModelOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelOutput::Message(m) => f.debug_tuple("Message").field(m).finish(),
            ModelOutput::Chunks(_) => f.write_str("Chunks(..)"),
        }
    }
}

/// Executor-local state of one execution.
pub struct NodeVariable {
    pub output: ModelOutput,
    pub client: Arc<dyn ModelClient>,
    pub messages: Vec<Message>,
    pub history: Vec<HistoryTurn>,
    pub question: String,
}

impl std::fmt::Debug for NodeVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeVariable")
            .field("output", &self.output)
            .field("messages", &self.messages)
            .field("history", &self.history)
            .field("question", &self.question)
            .finish_non_exhaustive()
    }
}

/// What the executor hands back to the workflow engine.
///
/// The engine does not branch on mode: both finishing paths dispatch on the
/// [`ModelOutput`] variant internally.
#[derive(Debug)]
pub struct NodeResult {
    variable: NodeVariable,
    workflow_updates: serde_json::Map<String, serde_json::Value>,
    routing: Routing,
    context: ContextSlot,
}

impl NodeResult {
    pub fn mode(&self) -> ExecutionMode {
        self.variable.output.mode()
    }

    pub fn variable(&self) -> &NodeVariable {
        &self.variable
    }

    /// Workflow-global updates produced by this node. Always empty for chat
    /// nodes.
    pub fn workflow_updates(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.workflow_updates
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    /// Handle to this execution's context slot. Empty until committed.
    pub fn context(&self) -> ContextSlot {
        self.context.clone()
    }

    /// Produce the user-facing response and commit the context.
    ///
    /// Buffered results commit immediately and return
    /// [`NodeResponse::Complete`]. Streamed results return
    /// [`NodeResponse::Streaming`]; the commit happens when that stream is
    /// exhausted, and never if it is dropped early or fails.
    pub fn into_response(self, post_handler: Arc<dyn PostHandler>) -> NodeResponse {
        let (output, writer, routing) = self.into_parts();
        match output {
            ModelOutput::Message(message) => NodeResponse::Complete(response::respond_buffered(
                message,
                writer,
                routing,
                post_handler.as_ref(),
            )),
            ModelOutput::Chunks(chunks) => NodeResponse::Streaming(response::ResponseStream::new(
                chunks,
                writer,
                routing,
                post_handler,
            )),
        }
    }

    /// Commit the context without producing a response.
    ///
    /// A streamed result is drained without forwarding. A failure while
    /// draining returns [`ChatNodeError::SequenceConsumption`] and leaves the
    /// context empty.
    pub async fn write_context(self) -> Result<NodeContext, ChatNodeError> {
        let (output, writer, _) = self.into_parts();
        match output {
            ModelOutput::Message(message) => Ok(writer.commit(message.content)),
            ModelOutput::Chunks(mut chunks) => {
                let mut answer = String::new();
                let mut received = 0usize;
                while let Some(item) = chunks.next().await {
                    match item {
                        Ok(chunk) => {
                            answer.push_str(&chunk.content);
                            received += 1;
                        }
                        Err(e) => {
                            return Err(ChatNodeError::SequenceConsumption {
                                forwarded: received,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                debug!("Drained {received} chunk(s) without forwarding");
                Ok(writer.commit(answer))
            }
        }
    }

    fn into_parts(self) -> (ModelOutput, ContextWriter, Routing) {
        let NodeVariable {
            output,
            client,
            messages,
            history,
            question,
        } = self.variable;
        let writer = ContextWriter::new(client, messages, history, question, self.context);
        (output, writer, self.routing)
    }
}

/// Runs chat node executions against a model provider.
pub struct ChatNodeExecutor {
    provider: Arc<dyn ModelProvider>,
    resolver: Arc<dyn PromptResolver>,
}

impl ChatNodeExecutor {
    /// Executor that passes prompts through unchanged.
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            resolver: Arc::new(IdentityResolver),
        }
    }

    /// Use a workflow prompt resolver for variable substitution.
    pub fn with_resolver(mut self, resolver: Arc<dyn PromptResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Execute one chat step.
    ///
    /// On error nothing is committed: model resolution failures are
    /// [`ChatNodeError::Configuration`], model call failures are
    /// [`ChatNodeError::Provider`].
    pub async fn execute(&self, request: &NodeExecutionRequest) -> Result<NodeResult, ChatNodeError> {
        let client = self.provider.resolve(&request.model_id)?;

        let history = history_window(&request.history, request.dialogue_number);
        let question = self.resolver.resolve(&request.prompt);
        let messages = assemble_messages(
            request.system.as_deref(),
            &question,
            &history,
            self.resolver.as_ref(),
        );
        info!(
            "Chat node call: model={}, messages={}, history_turns={}, stream={}, session={}, record={}",
            request.model_id,
            messages.len(),
            history.len(),
            request.stream,
            request.routing.session_id,
            request.routing.record_id,
        );

        let output = if request.stream {
            ModelOutput::Chunks(client.stream(&messages).await?)
        } else {
            ModelOutput::Message(client.invoke(&messages).await?)
        };

        Ok(NodeResult {
            variable: NodeVariable {
                output,
                client,
                messages,
                history,
                question,
            },
            workflow_updates: serde_json::Map::new(),
            routing: request.routing.clone(),
            context: ContextSlot::new(),
        })
    }
}
