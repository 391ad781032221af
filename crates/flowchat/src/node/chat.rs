//! The chat node instance.

use super::context::ContextSlot;
use super::details::{self, NodeDetails};
use super::executor::{ChatNodeExecutor, NodeResult};
use super::request::{ChatNodeParams, NodeExecutionRequest, NodeInvocation};
use crate::{CHAT_NODE_TYPE, ChatNodeError};
use tracing::debug;

/// One chat step in a workflow graph.
///
/// Holds the configured params and the context of its latest run. The
/// context slot is replaced on every [`run`](Self::run) and filled once the
/// returned [`NodeResult`] is consumed.
#[derive(Debug)]
pub struct ChatNode {
    id: String,
    params: ChatNodeParams,
    context: ContextSlot,
    run_time: Option<f64>,
}

impl ChatNode {
    pub const NODE_TYPE: &'static str = CHAT_NODE_TYPE;

    pub fn new(id: impl Into<String>, params: ChatNodeParams) -> Self {
        Self {
            id: id.into(),
            params,
            context: ContextSlot::new(),
            run_time: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &ChatNodeParams {
        &self.params
    }

    /// Chat nodes may terminate a workflow.
    pub fn is_end_node(&self) -> bool {
        true
    }

    /// Execute the node. The previous run's context is discarded first, so a
    /// failed run leaves the node without context.
    pub async fn run(
        &mut self,
        executor: &ChatNodeExecutor,
        invocation: NodeInvocation,
    ) -> Result<NodeResult, ChatNodeError> {
        self.context = ContextSlot::new();
        self.run_time = None;
        self.params.validate()?;
        debug!("Running {} node {}", Self::NODE_TYPE, self.id);
        let request = NodeExecutionRequest::from_parts(&self.params, invocation);
        let result = executor.execute(&request).await?;
        self.context = result.context();
        Ok(result)
    }

    /// Context of the latest run. Empty until its result is consumed.
    pub fn context(&self) -> &ContextSlot {
        &self.context
    }

    /// Record the wall time measured by the engine, in seconds.
    pub fn set_run_time(&mut self, seconds: f64) {
        self.run_time = Some(seconds);
    }

    pub fn run_time(&self) -> Option<f64> {
        self.run_time
    }

    /// Detail projection for audit and display.
    pub fn details(&self, index: usize) -> Result<NodeDetails, ChatNodeError> {
        details::project(
            index,
            self.run_time,
            self.params.system.as_deref(),
            Self::NODE_TYPE,
            &self.context,
        )
    }
}
