//! Prior chat records and the dialogue window.
//!
//! The persistence layer owns chat records; the node only reads the human
//! and model messages of each one. [`history_window`] keeps the most recent
//! `dialogue_number` records, and [`relinearize`] flattens a message list
//! plus the final answer into a role/content transcript.

use crate::{ChatNodeError, Message, MessageRole};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// A prior exchange, as exposed by the persistence layer.
pub trait ChatRecord: Send + Sync {
    /// The human-authored message of this exchange.
    fn human_message(&self) -> Message;

    /// The model-authored message of this exchange.
    fn ai_message(&self) -> Message;
}

/// A chat record loaded from storage: the question asked and the answer given.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredChatRecord {
    pub problem_text: String,
    pub answer_text: String,
}

impl StoredChatRecord {
    pub fn new(problem_text: impl Into<String>, answer_text: impl Into<String>) -> Self {
        Self {
            problem_text: problem_text.into(),
            answer_text: answer_text.into(),
        }
    }
}

impl ChatRecord for StoredChatRecord {
    fn human_message(&self) -> Message {
        Message::human(self.problem_text.clone())
    }

    fn ai_message(&self) -> Message {
        Message::assistant(self.answer_text.clone())
    }
}

/// One windowed history entry: the human turn and the model's reply.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HistoryTurn {
    pub human: Message,
    pub assistant: Message,
}

impl HistoryTurn {
    /// The two messages in conversation order.
    pub fn messages(&self) -> [&Message; 2] {
        [&self.human, &self.assistant]
    }
}

/// Select the most recent `dialogue_number` records as history turns.
///
/// The window starts at `max(0, len - dialogue_number)` and keeps the
/// original order. A window larger than the history returns everything.
/// A negative `dialogue_number` also returns the full history.
pub fn history_window<R>(records: &[R], dialogue_number: i64) -> Vec<HistoryTurn>
where
    R: AsRef<dyn ChatRecord>,
{
    let start = match usize::try_from(dialogue_number) {
        Ok(n) => records.len().saturating_sub(n),
        Err(_) => 0,
    };
    debug!(
        "History window: {} of {} record(s) (dialogue_number={dialogue_number})",
        records.len() - start,
        records.len()
    );
    records
        .iter()
        .skip(start)
        .map(|r| {
            let r = r.as_ref();
            HistoryTurn {
                human: r.human_message(),
                assistant: r.ai_message(),
            }
        })
        .collect()
}

/// One role/content pair of a flattened transcript.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: String,
    pub content: String,
}

impl TranscriptEntry {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Flatten `messages` plus the final `answer` into a transcript.
///
/// Human messages become `user`; every other role becomes `ai`. The answer
/// is appended as the last `ai` entry.
pub fn relinearize(messages: &[Message], answer: &str) -> Vec<TranscriptEntry> {
    messages
        .iter()
        .map(|m| {
            let role = if m.role == MessageRole::Human {
                "user"
            } else {
                "ai"
            };
            TranscriptEntry::new(role, m.content.clone())
        })
        .chain(std::iter::once(TranscriptEntry::new("ai", answer)))
        .collect()
}

/// Load stored chat records from a JSON array file.
pub fn load_records(path: &Path) -> Result<Vec<StoredChatRecord>, ChatNodeError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ChatNodeError::Configuration(format!("failed to read history {}: {e}", path.display()))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        ChatNodeError::Configuration(format!("invalid history {}: {e}", path.display()))
    })
}
