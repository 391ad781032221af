//! Prompt resolution and outgoing message assembly.
//!
//! Variable substitution belongs to the workflow; the node only sees it
//! through [`PromptResolver`]. [`assemble_messages`] builds the payload sent
//! to the model from the system instruction, the history window and the
//! resolved prompt.

use crate::Message;
use crate::history::HistoryTurn;

/// Workflow-variable substitution, opaque to the node.
pub trait PromptResolver: Send + Sync {
    fn resolve(&self, template: &str) -> String;
}

/// Resolver that returns templates unchanged.
pub struct IdentityResolver;

impl PromptResolver for IdentityResolver {
    fn resolve(&self, template: &str) -> String {
        template.to_string()
    }
}

/// A resolver backed by a closure.
///
/// ```
/// use flowchat::prompt::{FnPromptResolver, PromptResolver};
///
/// let resolver = FnPromptResolver::new(|t: &str| t.replace("{{name}}", "Ada"));
/// assert_eq!(resolver.resolve("Hi {{name}}"), "Hi Ada");
/// ```
pub struct FnPromptResolver<F>(F)
where
    F: Fn(&str) -> String + Send + Sync;

impl<F> FnPromptResolver<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> PromptResolver for FnPromptResolver<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn resolve(&self, template: &str) -> String {
        (self.0)(template)
    }
}

/// Build the outgoing message list.
///
/// With no system instruction (or an empty one) the list is
/// `[system(resolve("")), *history, human(question)]`. With a non-empty
/// instruction no system message is sent at all: `[*history, human(question)]`.
///
/// `question` is the already-resolved prompt.
// NOTE: the system message is only sent when the instruction is empty. This
// matches deployed workflows; see DESIGN.md before changing it.
pub fn assemble_messages(
    system: Option<&str>,
    question: &str,
    history: &[HistoryTurn],
    resolver: &dyn PromptResolver,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    if system.is_none_or(str::is_empty) {
        messages.push(Message::system(resolver.resolve(system.unwrap_or_default())));
    }
    for turn in history {
        messages.push(turn.human.clone());
        messages.push(turn.assistant.clone());
    }
    messages.push(Message::human(question));
    messages
}
