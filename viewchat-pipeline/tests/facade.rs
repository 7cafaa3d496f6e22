mod common;

use std::sync::Arc;

use common::*;
use futures::StreamExt;
use viewchat_memory::WindowMemory;
use viewchat_core::ViewchatError;
use viewchat_pipeline::adapters::envelope::{to_envelope, Framing};
use viewchat_pipeline::adapters::sse::to_sse_stream;
use viewchat_pipeline::{BuildError, ChatRequest, PipelineConfig, Sentinels, ViewChat};

#[test]
fn builder_requires_every_collaborator() {
    let missing_llm = ViewChat::builder()
        .with_executor(ScriptedExecutor::new())
        .with_schema(schema())
        .build();
    assert!(matches!(missing_llm, Err(BuildError::MissingLlm)));

    let missing_executor = ViewChat::builder()
        .with_llm(ScriptedLlm::new())
        .with_schema(schema())
        .build();
    assert!(matches!(missing_executor, Err(BuildError::MissingExecutor)));

    let missing_schema = ViewChat::builder()
        .with_llm(ScriptedLlm::new())
        .with_executor(ScriptedExecutor::new())
        .build();
    assert!(matches!(missing_schema, Err(BuildError::MissingSchema)));
}

#[test]
fn invalid_config_is_rejected_at_build_time() {
    let err = ViewChat::builder()
        .with_llm(ScriptedLlm::new())
        .with_executor(ScriptedExecutor::new())
        .with_schema(schema())
        .with_config(PipelineConfig {
            event_buffer_size: 0,
            ..PipelineConfig::default()
        })
        .build()
        .err()
        .expect("zero buffer rejected");

    let err: ViewchatError = err.into();
    assert!(matches!(err, ViewchatError::InvalidConfig(_)));
}

#[test]
fn zero_event_buffer_override_is_ignored() {
    let chat = ViewChat::builder()
        .with_llm(ScriptedLlm::new())
        .with_executor(ScriptedExecutor::new())
        .with_schema(schema())
        .with_event_buffer_size(0)
        .build()
        .expect("pipeline should build");

    assert_eq!(chat.event_buffer_size(), 64);
}

#[test]
fn session_keys_prefer_explicit_ids_then_identity() {
    assert_eq!(
        ChatRequest::new("q").with_identity("7").with_session_id("s").session_key(),
        "session:s"
    );
    assert_eq!(ChatRequest::new("q").with_identity("7").session_key(), "identity:7");

    let first = ChatRequest::new("q").session_key();
    let second = ChatRequest::new("q").session_key();
    assert!(first.starts_with("anonymous:"));
    assert_ne!(first, second);
}

#[test]
fn chosen_session_ids_never_alias_an_identity() {
    let chosen = ChatRequest::new("q").with_session_id("identity:42").session_key();
    let owner = ChatRequest::new("q").with_identity("42").session_key();

    assert_ne!(chosen, owner);
    assert!(ChatRequest::new("q").is_anonymous());
    assert!(!ChatRequest::new("q").with_identity("42").is_anonymous());
}

#[tokio::test]
async fn anonymous_questions_leave_no_session_behind() {
    let mut llm = ScriptedLlm::new();
    for _ in 0..4 {
        llm = llm
            .on_invoke(Ok("SELECT title FROM funding_view LIMIT 1"))
            .on_stream(chunks(&["ok"]));
    }
    let memory = Arc::new(WindowMemory::new(3));
    let chat = ViewChat::builder()
        .with_llm(llm)
        .with_executor(ScriptedExecutor::new())
        .with_schema(schema())
        .with_shared_memory(memory.clone())
        .with_config(config())
        .build()
        .expect("pipeline should build");

    for _ in 0..3 {
        let answer = chat.query(ChatRequest::new("q")).await.expect("answer");
        assert_eq!(answer.answer, "ok");
        assert!(chat.history(&answer.session_id).await.unwrap().is_empty());
    }
    let frames = collect_frames(chat.query_stream(ChatRequest::new("q")).await.unwrap()).await;
    assert_well_framed(&frames);

    assert_eq!(memory.active_sessions().unwrap(), 0);
}

#[tokio::test]
async fn reset_forgets_the_session() {
    let llm = ScriptedLlm::new()
        .on_invoke(Ok("SELECT title FROM funding_view LIMIT 1"))
        .on_stream(chunks(&["ok"]));
    let chat = ViewChat::builder()
        .with_llm(llm)
        .with_executor(ScriptedExecutor::new())
        .with_schema(schema())
        .with_config(config())
        .build()
        .expect("pipeline should build");

    chat.query(ChatRequest::new("q").with_session_id("cli"))
        .await
        .expect("answer");
    assert_eq!(chat.history("session:cli").await.unwrap().len(), 1);

    chat.reset("session:cli").await.unwrap();
    assert!(chat.history("session:cli").await.unwrap().is_empty());
}

#[tokio::test]
async fn legacy_clients_see_sentinel_bracketed_replies() {
    let llm = ScriptedLlm::new()
        .on_invoke(Ok("SELECT title FROM funding_view LIMIT 1"))
        .on_stream(chunks(&["안녕", "하세요"]));
    let chat = ViewChat::builder()
        .with_llm(llm)
        .with_executor(ScriptedExecutor::new())
        .with_schema(schema())
        .with_config(config())
        .build()
        .expect("pipeline should build");
    let framing = Framing::Legacy(Sentinels::default());

    let replies: Vec<String> = chat
        .query_stream(ChatRequest::new("q"))
        .await
        .expect("stream")
        .map(|frame| to_envelope(&frame, &framing).reply)
        .collect()
        .await;

    assert_eq!(replies, vec!["<SOS>", "안녕", "하세요", "<EOS>"]);
}

#[tokio::test]
async fn frames_render_as_server_sent_events() {
    let llm = ScriptedLlm::new()
        .on_invoke(Ok("SELECT title FROM funding_view LIMIT 1"))
        .on_stream(chunks(&["hi"]));
    let chat = ViewChat::builder()
        .with_llm(llm)
        .with_executor(ScriptedExecutor::new())
        .with_schema(schema())
        .with_config(config())
        .build()
        .expect("pipeline should build");

    let events: Vec<String> = to_sse_stream(chat.query_stream(ChatRequest::new("q")).await.unwrap())
        .collect()
        .await;

    assert_eq!(events.len(), 3);
    assert!(events[0].starts_with("event: start\n"));
    assert_eq!(events[1], "event: data\ndata: {\"text\":\"hi\"}\n\n");
    assert!(events[2].starts_with("event: end\n"));
}
