//! OpenRouter chat completions client.
//!
//! Implements [`ModelClient`] over the OpenAI-compatible `/chat/completions`
//! endpoint. Buffered calls parse the JSON body; streamed calls read the
//! Server-Sent Events body incrementally and yield one [`MessageChunk`] per
//! text delta as it arrives off the wire.

use super::tokens::TokenEstimator;
use super::{ChunkStream, ModelClient, ModelFuture};
use crate::{ChatNodeError, Message, MessageChunk};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default maximum tokens per completion.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

// ── Request / response types ───────────────────────────────────────

/// Chat completion request body. Unused optional fields are omitted.
#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "is_zero_u32")]
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Token usage statistics reported by the API.
#[derive(Deserialize, Debug, Clone)]
struct UsageInfo {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

/// Raw SSE data chunk.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client bound to one OpenRouter model.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    max_tokens: u32,
    temperature: Option<f32>,
    estimator: TokenEstimator,
}

impl OpenRouterClient {
    /// Create a client for `model` with default settings.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ChatNodeError> {
        let client = reqwest::Client::builder()
            .user_agent("flowchat/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ChatNodeError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            url: OPENROUTER_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            estimator: TokenEstimator::default(),
        })
    }

    /// Point the client at another OpenAI-compatible endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Use a calibrated chars-per-token ratio for token counting.
    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request<'a>(&'a self, messages: &'a [Message], stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, ChatNodeError> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, stream={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.stream,
        );
        let resp = self
            .client
            .post(self.url.as_str())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| ChatNodeError::Provider(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ChatNodeError::Provider(format!(
                "OpenRouter API HTTP {status}: {text}"
            )));
        }
        Ok(resp)
    }
}

impl ModelClient for OpenRouterClient {
    fn invoke<'a>(&'a self, messages: &'a [Message]) -> ModelFuture<'a, Message> {
        Box::pin(async move {
            let start = Instant::now();
            let resp = self.send(&self.request(messages, false)).await?;
            let text = resp
                .text()
                .await
                .map_err(|e| ChatNodeError::Provider(format!("failed to read response: {e}")))?;
            debug!(
                "LLM response in {:.1}s ({} bytes)",
                start.elapsed().as_secs_f64(),
                text.len()
            );
            parse_completion(&text)
        })
    }

    fn stream<'a>(&'a self, messages: &'a [Message]) -> ModelFuture<'a, ChunkStream> {
        Box::pin(async move {
            let resp = self.send(&self.request(messages, true)).await?;
            debug!("Streaming response opened");
            Ok(sse_stream(resp))
        })
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }
}

/// Parse a buffered completion body into the assistant message.
fn parse_completion(text: &str) -> Result<Message, ChatNodeError> {
    let parsed: RawChatResponse = serde_json::from_str(text)
        .map_err(|e| ChatNodeError::Provider(format!("failed to parse response: {e}")))?;

    if let Some(err) = parsed.error {
        return Err(ChatNodeError::Provider(format!(
            "OpenRouter API error: {}",
            err.message
        )));
    }

    if let Some(ref usage) = parsed.usage {
        debug!(
            "Token usage: prompt={}, completion={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
        );
    }

    let content = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    Ok(Message::assistant(content))
}

// ── SSE streaming ──────────────────────────────────────────────────

/// Incremental SSE reader state.
struct SseState<S> {
    body: S,
    lines: SseLineBuffer,
    pending: VecDeque<MessageChunk>,
    done: bool,
}

/// Turn an open SSE response into a chunk stream.
///
/// Bytes are read with `chunk()` so long answers never hit a single-body
/// timeout.
fn sse_stream(resp: reqwest::Response) -> ChunkStream {
    let body = futures::stream::unfold(resp, |mut resp| async move {
        match resp.chunk().await {
            Ok(Some(bytes)) => Some((Ok(bytes.to_vec()), resp)),
            Ok(None) => None,
            Err(e) => Some((
                Err(ChatNodeError::Provider(format!(
                    "failed to read streaming chunk: {e}"
                ))),
                resp,
            )),
        }
    });
    sse_chunks(body.boxed())
}

/// Parse a raw SSE byte stream into text chunks.
///
/// Each complete `data:` line is parsed as it arrives. The stream ends at
/// `data: [DONE]` or when the body ends, whichever comes first; a trailing
/// line without a newline is still parsed. A body read error is yielded once
/// and ends the stream.
fn sse_chunks<S>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<Vec<u8>, ChatNodeError>> + Send + Unpin + 'static,
{
    let state = SseState {
        body,
        lines: SseLineBuffer::default(),
        pending: VecDeque::new(),
        done: false,
    };
    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(chunk) = st.pending.pop_front() {
                return Some((Ok(chunk), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    st.done = st.lines.push(&bytes, &mut st.pending);
                }
                None => {
                    st.lines.finish(&mut st.pending);
                    st.done = true;
                    debug!("Stream body exhausted");
                }
                Some(Err(e)) => {
                    st.done = true;
                    st.pending.clear();
                    return Some((Err(e), st));
                }
            }
        }
    })
    .boxed()
}

/// Splits raw SSE bytes into lines and parses `data:` payloads.
///
/// Works on bytes so that multi-byte characters split across network reads
/// are decoded only once the whole line is present.
#[derive(Default)]
struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    /// Feed bytes; returns `true` once `data: [DONE]` has been seen.
    fn push(&mut self, bytes: &[u8], out: &mut VecDeque<MessageChunk>) -> bool {
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if handle_line(&String::from_utf8_lossy(&line), out) {
                return true;
            }
        }
        false
    }

    /// Flush an incomplete final line, if any.
    fn finish(&mut self, out: &mut VecDeque<MessageChunk>) {
        if self.buffer.is_empty() {
            return;
        }
        let rest = std::mem::take(&mut self.buffer);
        handle_line(&String::from_utf8_lossy(&rest), out);
    }
}

/// Handle one SSE line. Returns `true` for the `[DONE]` sentinel.
fn handle_line(line: &str, out: &mut VecDeque<MessageChunk>) -> bool {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return false;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return false;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return true;
    }
    parse_sse_data(data, out);
    false
}

/// Parse a single SSE `data:` payload into text chunks.
fn parse_sse_data(data: &str, out: &mut VecDeque<MessageChunk>) {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            for choice in chunk.choices.unwrap_or_default() {
                if let Some(content) = choice.delta.and_then(|d| d.content)
                    && !content.is_empty()
                {
                    out.push_back(MessageChunk::new(content));
                }
                if choice.finish_reason.is_some() {
                    trace!("Stream finish_reason: {:?}", choice.finish_reason);
                }
            }
        }
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} (data: {data})");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::BoxStream;

    fn contents(out: &VecDeque<MessageChunk>) -> Vec<&str> {
        out.iter().map(|c| c.content.as_str()).collect()
    }

    #[test]
    fn request_omits_defaults() {
        let client = OpenRouterClient::new("key", "test-model")
            .unwrap()
            .with_max_tokens(0);
        let messages = [Message::human("hi")];
        let json = serde_json::to_value(client.request(&messages, false)).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
        assert!(json.get("stream").is_none());

        let json = serde_json::to_value(client.request(&messages, true)).unwrap();
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn parse_completion_extracts_content() {
        let body = r#"{"choices":[{"message":{"content":"Hello!"},"finish_reason":"stop"}],
                       "usage":{"prompt_tokens":10,"completion_tokens":2}}"#;
        assert_eq!(parse_completion(body).unwrap(), Message::assistant("Hello!"));
    }

    #[test]
    fn parse_completion_surfaces_api_error() {
        let body = r#"{"error":{"message":"invalid key"}}"#;
        let err = parse_completion(body).unwrap_err();
        assert!(matches!(err, ChatNodeError::Provider(_)));
        assert!(err.to_string().contains("invalid key"));
    }

    #[test]
    fn parse_completion_without_choices_is_empty_answer() {
        assert_eq!(
            parse_completion(r#"{"choices":[]}"#).unwrap(),
            Message::assistant("")
        );
    }

    #[test]
    fn line_buffer_parses_deltas_across_reads() {
        let mut lines = SseLineBuffer::default();
        let mut out = VecDeque::new();
        assert!(!lines.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel", &mut out));
        assert!(out.is_empty());
        assert!(!lines.push(b"lo\"}}]}\n\n: keep-alive\n", &mut out));
        assert!(!lines.push(b"data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n", &mut out));
        assert_eq!(contents(&out), vec!["Hello", " world"]);
    }

    #[test]
    fn line_buffer_stops_at_done() {
        let mut lines = SseLineBuffer::default();
        let mut out = VecDeque::new();
        let done = lines.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\ndata: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n",
            &mut out,
        );
        assert!(done);
        assert_eq!(contents(&out), vec!["A"]);
    }

    #[test]
    fn line_buffer_keeps_split_multibyte_characters() {
        let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"é\"}}]}\n".as_bytes();
        let split = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut lines = SseLineBuffer::default();
        let mut out = VecDeque::new();
        lines.push(&payload[..split], &mut out);
        lines.push(&payload[split..], &mut out);
        assert_eq!(contents(&out), vec!["é"]);
    }

    #[test]
    fn finish_flushes_trailing_line() {
        let mut lines = SseLineBuffer::default();
        let mut out = VecDeque::new();
        lines.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}", &mut out);
        assert!(out.is_empty());
        lines.finish(&mut out);
        assert_eq!(contents(&out), vec!["tail"]);
    }

    #[test]
    fn data_prefix_without_space_is_accepted() {
        let mut lines = SseLineBuffer::default();
        let mut out = VecDeque::new();
        let done = lines.push(
            b"data:{\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\ndata:[DONE]\n",
            &mut out,
        );
        assert!(done);
        assert_eq!(contents(&out), vec!["A"]);
    }

    fn body(parts: Vec<Result<&str, ChatNodeError>>) -> BoxStream<'static, Result<Vec<u8>, ChatNodeError>> {
        let items: Vec<_> = parts
            .into_iter()
            .map(|p| p.map(|s| s.as_bytes().to_vec()))
            .collect();
        futures::stream::iter(items).boxed()
    }

    fn delta(text: &str) -> String {
        format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{text}\"}}}}]}}\n\n")
    }

    #[tokio::test]
    async fn body_ending_without_done_completes_stream() {
        let first = delta("Hel");
        let tail = "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}";
        let chunks: Vec<String> = sse_chunks(body(vec![Ok(first.as_str()), Ok(tail)]))
            .map(|c| c.unwrap().content)
            .collect()
            .await;
        assert_eq!(chunks, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn body_read_error_is_yielded_once() {
        let first = delta("A");
        let mut stream = sse_chunks(body(vec![
            Ok(first.as_str()),
            Err(ChatNodeError::Provider("connection reset".into())),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n"),
        ]));
        assert_eq!(stream.next().await.unwrap().unwrap().content, "A");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ChatNodeError::Provider(_)));
        assert!(err.to_string().contains("connection reset"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn body_after_done_is_not_read() {
        let first = delta("A");
        let chunks: Vec<String> = sse_chunks(body(vec![
            Ok(first.as_str()),
            Ok("data: [DONE]\n"),
            Err(ChatNodeError::Provider("should not be read".into())),
        ]))
        .map(|c| c.unwrap().content)
        .collect()
        .await;
        assert_eq!(chunks, vec!["A"]);
    }

    #[test]
    fn empty_and_reasoning_only_deltas_are_skipped() {
        let mut out = VecDeque::new();
        parse_sse_data(r#"{"choices":[{"delta":{"content":""}}]}"#, &mut out);
        parse_sse_data(r#"{"choices":[{"delta":{"reasoning":"hmm"}}]}"#, &mut out);
        parse_sse_data("not json", &mut out);
        assert!(out.is_empty());
    }
}
