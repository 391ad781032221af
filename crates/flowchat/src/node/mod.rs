//! Chat node runtime: execution, response adaptation and node context.
//!
//! - [`chat::ChatNode`]: the node instance a workflow engine holds. Start here.
//! - [`executor::ChatNodeExecutor`]: resolves the model, assembles messages
//!   and makes the single model call; returns a [`NodeResult`].
//! - [`response`]: buffered and streamed responses, [`PostHandler`],
//!   [`ResponseSink`] and [`deliver`].
//! - [`context`]: write-once [`ContextSlot`] and the [`ContextWriter`].
//! - [`details`]: [`NodeDetails`] projection for audit and display.
//! - [`request`]: [`ChatNodeParams`], [`NodeInvocation`] and the immutable
//!   [`NodeExecutionRequest`].

pub mod chat;
pub mod context;
pub mod details;
pub mod executor;
pub mod request;
pub mod response;

pub use chat::ChatNode;
pub use context::{ContextSlot, ContextWriter, NodeContext};
pub use details::NodeDetails;
pub use executor::{ChatNodeExecutor, ExecutionMode, ModelOutput, NodeResult, NodeVariable};
pub use request::{ChatNodeParams, NodeExecutionRequest, NodeInvocation, Routing, generate_id};
pub use response::{
    CollectingSink, FnPostHandler, NodeResponse, NoopPostHandler, PostHandler, ResponseFragment,
    ResponseSink, ResponseStream, SseSink, deliver,
};
