//! End-to-end chat node behaviour against the scripted model.

use flowchat::history::StoredChatRecord;
use flowchat::model::{ModelClient, ModelRegistry, ScriptedModel};
use flowchat::node::{
    ChatNode, ChatNodeExecutor, ChatNodeParams, CollectingSink, ExecutionMode, FnPostHandler,
    NodeInvocation, NodeResponse, NoopPostHandler, ResponseFragment, SseSink, deliver,
};
use flowchat::prompt::FnPromptResolver;
use flowchat::{ChatNodeError, Message, MessageRole};
use futures::StreamExt;
use std::sync::{Arc, Mutex};

fn executor_with(model: Arc<ScriptedModel>) -> ChatNodeExecutor {
    let registry = ModelRegistry::new().with("scripted", model);
    ChatNodeExecutor::new(Arc::new(registry))
}

fn node(prompt: &str) -> ChatNode {
    ChatNode::new("node-1", ChatNodeParams::new("scripted", prompt))
}

fn invocation(stream: bool) -> NodeInvocation {
    NodeInvocation::new("chat-1", "record-1").with_stream(stream)
}

fn history(n: usize) -> Vec<StoredChatRecord> {
    (0..n)
        .map(|i| StoredChatRecord::new(format!("q{i}"), format!("a{i}")))
        .collect()
}

#[tokio::test]
async fn buffered_commits_answer_and_tokens() {
    let model = Arc::new(ScriptedModel::new("X"));
    let executor = executor_with(model.clone());
    let mut node = node("What is X?");

    let result = node.run(&executor, invocation(false)).await.unwrap();
    assert_eq!(result.mode(), ExecutionMode::Buffered);
    assert!(result.workflow_updates().is_empty());
    assert!(!node.context().is_committed());

    let response = result.into_response(Arc::new(NoopPostHandler));
    let NodeResponse::Complete(fragment) = response else {
        panic!("expected a complete response");
    };
    assert_eq!(fragment.content, "X");
    assert!(fragment.is_end);
    assert_eq!(fragment.chat_id, "chat-1");
    assert_eq!(fragment.id, "record-1");

    let context = node.context().get().unwrap();
    assert_eq!(context.answer, "X");
    assert_eq!(context.answer_tokens, model.count_tokens("X"));
    assert_eq!(context.question, "What is X?");
    let sent = &model.calls()[0];
    assert_eq!(context.message_tokens, model.count_tokens_for_messages(sent));
}

#[tokio::test]
async fn streaming_forwards_every_chunk_before_commit() {
    let model = Arc::new(ScriptedModel::new("ABC").with_chunks(["A", "B", "C"]));
    let executor = executor_with(model.clone());
    let mut node = node("spell it");

    let result = node.run(&executor, invocation(true)).await.unwrap();
    assert_eq!(result.mode(), ExecutionMode::Streamed);
    let NodeResponse::Streaming(mut stream) = result.into_response(Arc::new(NoopPostHandler))
    else {
        panic!("expected a streaming response");
    };

    for expected in ["A", "B", "C"] {
        let fragment = stream.next().await.unwrap().unwrap();
        assert_eq!(fragment.content, expected);
        assert!(!fragment.is_end);
        assert!(
            !node.context().is_committed(),
            "context committed before the stream was exhausted"
        );
    }

    let end = stream.next().await.unwrap().unwrap();
    assert!(end.is_end);
    assert_eq!(end.content, "");
    assert!(stream.next().await.is_none());

    let context = node.context().get().unwrap();
    assert_eq!(context.answer, "ABC");
    assert_eq!(context.answer_tokens, model.count_tokens("ABC"));
}

#[tokio::test]
async fn dropping_stream_early_skips_commit() {
    let model = Arc::new(ScriptedModel::new("ABC").with_chunks(["A", "B", "C"]));
    let executor = executor_with(model);
    let mut node = node("spell it");

    let result = node.run(&executor, invocation(true)).await.unwrap();
    let NodeResponse::Streaming(mut stream) = result.into_response(Arc::new(NoopPostHandler))
    else {
        panic!("expected a streaming response");
    };
    assert_eq!(stream.next().await.unwrap().unwrap().content, "A");
    drop(stream);

    assert!(!node.context().is_committed());
    let err = node.details(0).unwrap_err();
    assert!(matches!(err, ChatNodeError::OrderingViolation(_)));
}

#[tokio::test]
async fn mid_stream_error_is_sequence_consumption_without_commit() {
    let model = Arc::new(
        ScriptedModel::new("ABC")
            .with_chunks(["A", "B", "C"])
            .failing_after(2, "connection reset"),
    );
    let executor = executor_with(model);
    let mut node = node("spell it");

    let result = node.run(&executor, invocation(true)).await.unwrap();
    let mut sink = CollectingSink::new();
    let err = deliver(result.into_response(Arc::new(NoopPostHandler)), &mut sink)
        .await
        .unwrap_err();

    match err {
        ChatNodeError::SequenceConsumption { forwarded, reason } => {
            assert_eq!(forwarded, 2);
            assert!(reason.contains("connection reset"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sink.text(), "AB");
    assert!(!node.context().is_committed());
}

#[tokio::test]
async fn provider_failure_leaves_no_context() {
    for stream in [false, true] {
        let model = Arc::new(
            ScriptedModel::new("unused")
                .failing_invoke("rate limited")
                .failing_stream("rate limited"),
        );
        let executor = executor_with(model);
        let mut node = node("hello");

        let err = node.run(&executor, invocation(stream)).await.unwrap_err();
        assert!(matches!(err, ChatNodeError::Provider(_)));
        assert!(!node.context().is_committed());
    }
}

#[tokio::test]
async fn unknown_model_is_configuration_error() {
    let executor = executor_with(Arc::new(ScriptedModel::new("unused")));
    let mut node = ChatNode::new("node-1", ChatNodeParams::new("missing", "hello"));

    let err = node.run(&executor, invocation(false)).await.unwrap_err();
    assert!(matches!(err, ChatNodeError::Configuration(_)));
    assert!(err.to_string().contains("missing"));
    assert!(!node.context().is_committed());
}

#[tokio::test]
async fn rerun_discards_previous_context() {
    let executor = executor_with(Arc::new(ScriptedModel::new("first")));
    let mut node = node("hello");
    let result = node.run(&executor, invocation(false)).await.unwrap();
    result.write_context().await.unwrap();
    assert!(node.context().is_committed());

    let _pending = node.run(&executor, invocation(false)).await.unwrap();
    assert!(!node.context().is_committed());
}

#[tokio::test]
async fn write_context_drains_stream_without_forwarding() {
    let model = Arc::new(ScriptedModel::new("partial answer"));
    let executor = executor_with(model.clone());
    let mut node = node("summarize");

    let result = node.run(&executor, invocation(true)).await.unwrap();
    let context = result.write_context().await.unwrap();
    assert_eq!(context.answer, "partial answer");
    assert_eq!(node.context().get(), Some(&context));
}

#[tokio::test]
async fn write_context_stream_error_skips_commit() {
    let model = Arc::new(ScriptedModel::new("a b c").failing_after(1, "eof"));
    let executor = executor_with(model);
    let mut node = node("summarize");

    let result = node.run(&executor, invocation(true)).await.unwrap();
    let err = result.write_context().await.unwrap_err();
    assert!(matches!(err, ChatNodeError::SequenceConsumption { forwarded: 1, .. }));
    assert!(!node.context().is_committed());
}

#[tokio::test]
async fn failing_post_handler_keeps_commit() {
    let executor = executor_with(Arc::new(ScriptedModel::new("kept").with_chunks(["ke", "pt"])));
    let calls = Arc::new(Mutex::new(Vec::<ResponseFragment>::new()));
    let seen = calls.clone();
    let hook = Arc::new(FnPostHandler::new(
        move |_: &str, _: &str, response: &ResponseFragment| {
            seen.lock().unwrap().push(response.clone());
            Err("storage unavailable".to_string())
        },
    ));

    for stream in [false, true] {
        let mut node = node("hello");
        let result = node.run(&executor, invocation(stream)).await.unwrap();
        let mut sink = CollectingSink::new();
        deliver(result.into_response(hook.clone()), &mut sink).await.unwrap();
        assert_eq!(node.context().get().unwrap().answer, "kept");
    }

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|r| r.content == "kept" && r.is_end));
}

#[tokio::test]
async fn details_match_committed_context() {
    let model = Arc::new(ScriptedModel::new("Paris"));
    let executor = executor_with(model);
    let params = ChatNodeParams::new("scripted", "Capital of France?")
        .with_system("Answer briefly.")
        .with_dialogue_number(1);
    let mut node = ChatNode::new("node-1", params);

    let result = node
        .run(&executor, invocation(false).with_history(history(3)))
        .await
        .unwrap();
    assert!(node.details(0).is_err());
    result.write_context().await.unwrap();
    node.set_run_time(0.5);

    let details = node.details(4).unwrap();
    let context = node.context().get().unwrap();
    assert_eq!(details.index, 4);
    assert_eq!(details.run_time, Some(0.5));
    assert_eq!(details.system.as_deref(), Some("Answer briefly."));
    assert_eq!(details.question, context.question);
    assert_eq!(details.answer, "Paris");
    assert_eq!(details.node_type, "ai-chat-node");
    assert_eq!(details.message_tokens, context.message_tokens);
    assert_eq!(details.answer_tokens, context.answer_tokens);
    let roles: Vec<&str> = details.history_message.iter().map(|e| e.role.as_str()).collect();
    assert_eq!(roles, vec!["human", "ai"]);
    assert_eq!(details.history_message[0].content, "q2");
}

#[tokio::test]
async fn model_receives_windowed_history_and_resolved_prompt() {
    let model = Arc::new(ScriptedModel::new("ok"));
    let resolver = FnPromptResolver::new(|t: &str| t.replace("{{topic}}", "ownership"));
    let executor = executor_with(model.clone()).with_resolver(Arc::new(resolver));
    let params = ChatNodeParams::new("scripted", "Explain {{topic}}").with_dialogue_number(2);
    let mut node = ChatNode::new("node-1", params);

    let result = node
        .run(&executor, invocation(false).with_history(history(4)))
        .await
        .unwrap();
    assert_eq!(result.variable().question, "Explain ownership");
    result.write_context().await.unwrap();

    let sent = &model.calls()[0];
    assert_eq!(
        sent,
        &vec![
            Message::system(""),
            Message::human("q2"),
            Message::assistant("a2"),
            Message::human("q3"),
            Message::assistant("a3"),
            Message::human("Explain ownership"),
        ]
    );
    assert_eq!(node.context().get().unwrap().history_message.len(), 2);
}

#[tokio::test]
async fn configured_system_instruction_is_not_sent() {
    let model = Arc::new(ScriptedModel::new("ok"));
    let executor = executor_with(model.clone());
    let params = ChatNodeParams::new("scripted", "hi").with_system("You are terse.");
    let mut node = ChatNode::new("node-1", params);

    node.run(&executor, invocation(false))
        .await
        .unwrap()
        .write_context()
        .await
        .unwrap();
    let sent = &model.calls()[0];
    assert!(sent.iter().all(|m| m.role != MessageRole::System));
    assert_eq!(sent, &vec![Message::human("hi")]);
}

#[tokio::test]
async fn sse_sink_frames_each_fragment() {
    let executor = executor_with(Arc::new(ScriptedModel::new("hello there")));
    let mut node = node("greet");
    let result = node.run(&executor, invocation(true)).await.unwrap();

    let mut sink = SseSink::new(Vec::new());
    deliver(result.into_response(Arc::new(NoopPostHandler)), &mut sink)
        .await
        .unwrap();
    let out = String::from_utf8(sink.into_inner()).unwrap();

    let frames: Vec<ResponseFragment> = out
        .split("\n\n")
        .filter(|f| !f.is_empty())
        .map(|f| serde_json::from_str(f.strip_prefix("data: ").unwrap()).unwrap())
        .collect();
    let contents: Vec<&str> = frames.iter().map(|f| f.content.as_str()).collect();
    assert_eq!(contents, vec!["hello ", "there", ""]);
    assert!(frames.last().unwrap().is_end);
    assert_eq!(node.context().get().unwrap().answer, "hello there");
}
