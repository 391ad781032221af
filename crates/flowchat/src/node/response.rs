//! Response adaptation and delivery.
//!
//! | Type | Role |
//! |------|------|
//! | [`ResponseFragment`] | One frame sent to the user (`chat_id`, `id`, `content`, `is_end`) |
//! | [`NodeResponse`] | A finished fragment or a [`ResponseStream`] of them |
//! | [`PostHandler`] | Side effect run once the full answer is known |
//! | [`ResponseSink`] | Where fragments go ([`SseSink`], [`CollectingSink`]) |
//!
//! A [`ResponseStream`] forwards chunks and accumulates the answer in the
//! same poll. The context is committed only after the last chunk has been
//! forwarded, so dropping the stream early or hitting an error mid-way
//! leaves the node without context.

use super::context::ContextWriter;
use super::request::Routing;
use crate::model::ChunkStream;
use crate::{ChatNodeError, Message};
use futures::stream::{BoxStream, Fuse, FusedStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, trace, warn};

/// One frame of the user-facing response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ResponseFragment {
    pub chat_id: String,
    pub id: String,
    pub operate: bool,
    pub content: String,
    pub is_end: bool,
}

impl ResponseFragment {
    pub fn new(routing: &Routing, content: impl Into<String>, is_end: bool) -> Self {
        Self {
            chat_id: routing.session_id.clone(),
            id: routing.record_id.clone(),
            operate: true,
            content: content.into(),
            is_end,
        }
    }
}

/// Post-processing hook, called once per response with the complete answer.
///
/// Failures are logged and never undo the context commit.
pub trait PostHandler: Send + Sync {
    fn handle(
        &self,
        session_id: &str,
        record_id: &str,
        response: &ResponseFragment,
    ) -> Result<(), String>;
}

/// A post handler that does nothing.
pub struct NoopPostHandler;

impl PostHandler for NoopPostHandler {
    fn handle(&self, _: &str, _: &str, _: &ResponseFragment) -> Result<(), String> {
        Ok(())
    }
}

/// A post handler backed by a closure.
pub struct FnPostHandler<F>(F)
where
    F: Fn(&str, &str, &ResponseFragment) -> Result<(), String> + Send + Sync;

impl<F> FnPostHandler<F>
where
    F: Fn(&str, &str, &ResponseFragment) -> Result<(), String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> PostHandler for FnPostHandler<F>
where
    F: Fn(&str, &str, &ResponseFragment) -> Result<(), String> + Send + Sync,
{
    fn handle(
        &self,
        session_id: &str,
        record_id: &str,
        response: &ResponseFragment,
    ) -> Result<(), String> {
        (self.0)(session_id, record_id, response)
    }
}

fn run_post_handler(handler: &dyn PostHandler, routing: &Routing, response: &ResponseFragment) {
    if let Err(e) = handler.handle(&routing.session_id, &routing.record_id, response) {
        warn!(
            "Post handler failed for record {}: {e}",
            routing.record_id
        );
    }
}

/// The user-facing response of one execution.
pub enum NodeResponse {
    Complete(ResponseFragment),
    Streaming(ResponseStream),
}

impl std::fmt::Debug for NodeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeResponse::Complete(fragment) => f.debug_tuple("Complete").field(fragment).finish(),
            NodeResponse::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

pub(crate) fn respond_buffered(
    message: Message,
    writer: ContextWriter,
    routing: Routing,
    post_handler: &dyn PostHandler,
) -> ResponseFragment {
    let context = writer.commit(message.content);
    let response = ResponseFragment::new(&routing, context.answer, true);
    run_post_handler(post_handler, &routing, &response);
    response
}

struct TeeState {
    chunks: ChunkStream,
    answer: String,
    forwarded: usize,
    writer: Option<ContextWriter>,
    routing: Routing,
    post_handler: Arc<dyn PostHandler>,
}

/// Streamed response: forwards each chunk as a fragment, then commits.
///
/// Yields `is_end: false` fragments in production order. Once the model
/// stream is exhausted the context is committed with the accumulated text,
/// the post handler runs with the complete answer, and a final empty
/// `is_end: true` fragment is yielded. A model error yields
/// [`ChatNodeError::SequenceConsumption`] and ends the stream uncommitted.
/// Once ended, the stream keeps returning `None`.
pub struct ResponseStream {
    inner: Fuse<BoxStream<'static, Result<ResponseFragment, ChatNodeError>>>,
}

impl ResponseStream {
    pub(crate) fn new(
        chunks: ChunkStream,
        writer: ContextWriter,
        routing: Routing,
        post_handler: Arc<dyn PostHandler>,
    ) -> Self {
        let state = TeeState {
            chunks,
            answer: String::new(),
            forwarded: 0,
            writer: Some(writer),
            routing,
            post_handler,
        };
        let inner = futures::stream::unfold(state, |mut st| async move {
            // The writer is dropped when the model stream fails.
            if st.writer.is_none() {
                return None;
            }
            match st.chunks.next().await {
                Some(Ok(chunk)) => {
                    st.answer.push_str(&chunk.content);
                    st.forwarded += 1;
                    trace!("Forwarding chunk {} ({} bytes)", st.forwarded, chunk.content.len());
                    let fragment = ResponseFragment::new(&st.routing, chunk.content, false);
                    Some((Ok(fragment), st))
                }
                Some(Err(e)) => {
                    st.writer = None;
                    warn!(
                        "Model stream failed after {} chunk(s); context not written",
                        st.forwarded
                    );
                    let err = ChatNodeError::SequenceConsumption {
                        forwarded: st.forwarded,
                        reason: e.to_string(),
                    };
                    Some((Err(err), st))
                }
                None => {
                    let Some(writer) = st.writer.take() else {
                        return None;
                    };
                    let context = writer.commit(std::mem::take(&mut st.answer));
                    debug!("Stream finished after {} chunk(s)", st.forwarded);
                    let complete = ResponseFragment::new(&st.routing, context.answer, true);
                    run_post_handler(st.post_handler.as_ref(), &st.routing, &complete);
                    let end = ResponseFragment::new(&st.routing, "", true);
                    Some((Ok(end), st))
                }
            }
        });
        Self {
            inner: inner.boxed().fuse(),
        }
    }
}

impl Stream for ResponseStream {
    type Item = Result<ResponseFragment, ChatNodeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl FusedStream for ResponseStream {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

/// Destination for response fragments.
pub trait ResponseSink {
    fn send(&mut self, fragment: &ResponseFragment) -> Result<(), ChatNodeError>;
}

/// Writes fragments as server-sent events: `data: <json>\n\n`.
pub struct SseSink<W: Write> {
    writer: W,
}

impl<W: Write> SseSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResponseSink for SseSink<W> {
    fn send(&mut self, fragment: &ResponseFragment) -> Result<(), ChatNodeError> {
        let json = serde_json::to_string(fragment)?;
        write!(self.writer, "data: {json}\n\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps every fragment in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub fragments: Vec<ResponseFragment>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenated content of all fragments.
    pub fn text(&self) -> String {
        self.fragments.iter().map(|f| f.content.as_str()).collect()
    }
}

impl ResponseSink for CollectingSink {
    fn send(&mut self, fragment: &ResponseFragment) -> Result<(), ChatNodeError> {
        self.fragments.push(fragment.clone());
        Ok(())
    }
}

/// Drive a response into a sink.
///
/// A sink failure stops consumption; for a streamed response the remaining
/// chunks are dropped and the context is not written.
pub async fn deliver(response: NodeResponse, sink: &mut dyn ResponseSink) -> Result<(), ChatNodeError> {
    match response {
        NodeResponse::Complete(fragment) => sink.send(&fragment),
        NodeResponse::Streaming(mut stream) => {
            while let Some(fragment) = stream.next().await {
                sink.send(&fragment?)?;
            }
            Ok(())
        }
    }
}
