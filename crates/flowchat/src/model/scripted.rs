//! Deterministic offline model client.
//!
//! [`ScriptedModel`] replays a fixed reply, either whole (`invoke`) or as a
//! scripted chunk sequence (`stream`). Failures can be injected at call time
//! or mid-stream, and every call's message list is recorded for inspection.

use super::tokens::TokenEstimator;
use super::{ChunkStream, ModelClient, ModelFuture};
use crate::{ChatNodeError, Message, MessageChunk};
use futures::StreamExt;
use std::sync::Mutex;
use tracing::debug;

/// Offline [`ModelClient`] with a canned reply.
///
/// # Example
///
/// ```
/// use flowchat::model::ScriptedModel;
///
/// let model = ScriptedModel::new("ABC").with_chunks(["A", "B", "C"]);
/// assert_eq!(model.chunks(), vec!["A", "B", "C"]);
/// assert_eq!(model.calls().len(), 0);
/// ```
#[derive(Debug)]
pub struct ScriptedModel {
    reply: String,
    chunks: Option<Vec<String>>,
    invoke_error: Option<String>,
    stream_error: Option<String>,
    fail_after: Option<(usize, String)>,
    estimator: TokenEstimator,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    /// A model that always answers `reply`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            chunks: None,
            invoke_error: None,
            stream_error: None,
            fail_after: None,
            estimator: TokenEstimator::default(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stream exactly these chunks instead of splitting the reply on spaces.
    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = Some(chunks.into_iter().map(Into::into).collect());
        self
    }

    /// Make `invoke` fail with a provider error.
    pub fn failing_invoke(mut self, reason: impl Into<String>) -> Self {
        self.invoke_error = Some(reason.into());
        self
    }

    /// Make `stream` fail before returning a stream.
    pub fn failing_stream(mut self, reason: impl Into<String>) -> Self {
        self.stream_error = Some(reason.into());
        self
    }

    /// Make the stream yield an error after `count` chunks.
    pub fn failing_after(mut self, count: usize, reason: impl Into<String>) -> Self {
        self.fail_after = Some((count, reason.into()));
        self
    }

    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// The chunk script used by `stream`.
    pub fn chunks(&self) -> Vec<String> {
        match &self.chunks {
            Some(chunks) => chunks.clone(),
            None => self
                .reply
                .split_inclusive(' ')
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Message lists received so far, in call order.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, messages: &[Message]) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
    }
}

impl ModelClient for ScriptedModel {
    fn invoke<'a>(&'a self, messages: &'a [Message]) -> ModelFuture<'a, Message> {
        Box::pin(async move {
            self.record(messages);
            if let Some(reason) = &self.invoke_error {
                return Err(ChatNodeError::Provider(reason.clone()));
            }
            debug!("Scripted invoke: {} message(s)", messages.len());
            Ok(Message::assistant(self.reply.clone()))
        })
    }

    fn stream<'a>(&'a self, messages: &'a [Message]) -> ModelFuture<'a, ChunkStream> {
        Box::pin(async move {
            self.record(messages);
            if let Some(reason) = &self.stream_error {
                return Err(ChatNodeError::Provider(reason.clone()));
            }

            let mut items: Vec<Result<MessageChunk, ChatNodeError>> =
                self.chunks().into_iter().map(|c| Ok(MessageChunk::new(c))).collect();
            if let Some((count, reason)) = &self.fail_after {
                items.truncate(*count);
                items.push(Err(ChatNodeError::Provider(reason.clone())));
            }
            debug!("Scripted stream: {} item(s)", items.len());
            Ok(futures::stream::iter(items).boxed())
        })
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }
}
