//! Execution detail projection for audit and UI display.

use super::context::ContextSlot;
use crate::ChatNodeError;
use crate::history::TranscriptEntry;
use serde::{Deserialize, Serialize};

/// Serializable summary of one node execution.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NodeDetails {
    pub index: usize,
    pub run_time: Option<f64>,
    pub system: Option<String>,
    /// History window as `human`/`ai` role/content pairs.
    pub history_message: Vec<TranscriptEntry>,
    pub question: String,
    pub answer: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub message_tokens: usize,
    pub answer_tokens: usize,
}

/// Project a committed context into [`NodeDetails`].
///
/// Fails with [`ChatNodeError::OrderingViolation`] when the slot is still
/// empty, i.e. the node has not finished.
pub fn project(
    index: usize,
    run_time: Option<f64>,
    system: Option<&str>,
    node_type: &str,
    slot: &ContextSlot,
) -> Result<NodeDetails, ChatNodeError> {
    let context = slot.get().ok_or_else(|| {
        ChatNodeError::OrderingViolation(format!(
            "details requested for {node_type} node {index} before its context was committed"
        ))
    })?;
    let history_message = context
        .history_message
        .iter()
        .flat_map(|turn| turn.messages())
        .map(|m| TranscriptEntry::new(m.role.kind(), m.content.clone()))
        .collect();
    Ok(NodeDetails {
        index,
        run_time,
        system: system.map(str::to_string),
        history_message,
        question: context.question.clone(),
        answer: context.answer.clone(),
        node_type: node_type.to_string(),
        message_tokens: context.message_tokens,
        answer_tokens: context.answer_tokens,
    })
}
