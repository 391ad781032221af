//! Node context and the context writer.
//!
//! A [`NodeContext`] is published into a [`ContextSlot`] as a single batch.
//! Readers (the detail projection, downstream nodes) see either no context
//! or the complete one; there is no state where the answer is present but
//! its token counts are not. An empty slot means the node did not complete.

use crate::Message;
use crate::history::HistoryTurn;
use crate::model::ModelClient;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Durable output of one chat node execution.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NodeContext {
    /// Tokens in the full outgoing message list.
    pub message_tokens: usize,
    /// Tokens in the final answer.
    pub answer_tokens: usize,
    pub answer: String,
    pub history_message: Vec<HistoryTurn>,
    pub question: String,
}

/// Write-once holder for a node's context.
///
/// Cloning shares the same slot. The first commit wins; later commits are
/// ignored and return the stored context.
#[derive(Clone, Debug, Default)]
pub struct ContextSlot(Arc<OnceLock<NodeContext>>);

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed context, if the node completed.
    pub fn get(&self) -> Option<&NodeContext> {
        self.0.get()
    }

    pub fn is_committed(&self) -> bool {
        self.0.get().is_some()
    }

    fn publish(&self, context: NodeContext) -> &NodeContext {
        self.0.get_or_init(|| context)
    }
}

/// Computes token counts and commits the final answer into a slot.
///
/// Holds the executor-local state needed at commit time: the client (for
/// token counting), the outgoing messages, the history window and the
/// resolved question.
pub struct ContextWriter {
    client: Arc<dyn ModelClient>,
    messages: Vec<Message>,
    history: Vec<HistoryTurn>,
    question: String,
    slot: ContextSlot,
}

impl ContextWriter {
    pub fn new(
        client: Arc<dyn ModelClient>,
        messages: Vec<Message>,
        history: Vec<HistoryTurn>,
        question: String,
        slot: ContextSlot,
    ) -> Self {
        Self {
            client,
            messages,
            history,
            question,
            slot,
        }
    }

    /// Count tokens for `answer` and the outgoing messages, then publish all
    /// five context fields at once. Calling it again is a no-op that returns
    /// the first committed context.
    pub fn commit(&self, answer: String) -> NodeContext {
        if let Some(existing) = self.slot.get() {
            return existing.clone();
        }
        let message_tokens = self.client.count_tokens_for_messages(&self.messages);
        let answer_tokens = self.client.count_tokens(&answer);
        debug!(
            "Committing node context: message_tokens={message_tokens}, answer_tokens={answer_tokens}, answer_chars={}",
            answer.chars().count()
        );
        let context = NodeContext {
            message_tokens,
            answer_tokens,
            answer,
            history_message: self.history.clone(),
            question: self.question.clone(),
        };
        self.slot.publish(context).clone()
    }

    pub fn slot(&self) -> &ContextSlot {
        &self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    fn writer(slot: ContextSlot) -> ContextWriter {
        ContextWriter::new(
            Arc::new(ScriptedModel::new("")),
            vec![Message::system(""), Message::human("What is Rust?")],
            vec![],
            "What is Rust?".into(),
            slot,
        )
    }

    #[test]
    fn slot_starts_empty() {
        let slot = ContextSlot::new();
        assert!(!slot.is_committed());
        assert!(slot.get().is_none());
    }

    #[test]
    fn commit_fills_all_fields() {
        let slot = ContextSlot::new();
        let ctx = writer(slot.clone()).commit("A language.".into());
        let model = ScriptedModel::new("");
        assert_eq!(ctx.answer, "A language.");
        assert_eq!(ctx.answer_tokens, model.count_tokens("A language."));
        assert_eq!(ctx.message_tokens, model.count_tokens("What is Rust?"));
        assert_eq!(ctx.question, "What is Rust?");
        assert_eq!(slot.get(), Some(&ctx));
    }

    #[test]
    fn second_commit_keeps_first_value() {
        let slot = ContextSlot::new();
        let w = writer(slot.clone());
        let first = w.commit("one".into());
        let second = w.commit("two".into());
        assert_eq!(first, second);
        assert_eq!(slot.get().unwrap().answer, "one");
    }
}
