mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tokio::sync::mpsc;
use viewchat_core::{StreamEvent, StreamFrame, ViewchatError};
use viewchat_memory::{ConversationTurn, Memory, WindowMemory};
use viewchat_pipeline::{
    CoordinatorState, Question, QueryTranslator, ResponseStreamer, RetryCoordinator,
};

fn coordinator(
    llm: &ScriptedLlm,
    executor: ScriptedExecutor,
    memory: Arc<WindowMemory>,
    max_attempts: usize,
) -> RetryCoordinator {
    let llm: Arc<dyn viewchat_core::Llm> = Arc::new(llm.clone());
    let translator = QueryTranslator::new(llm.clone(), Arc::new(schema()), memory.clone());
    RetryCoordinator::new(
        Arc::new(translator),
        Arc::new(executor),
        Arc::new(ResponseStreamer::new(llm)),
        memory,
    )
    .with_max_attempts(max_attempts)
    .with_backoff(Duration::from_millis(1))
}

fn question(session: &str) -> Question {
    Question {
        session: session.to_string(),
        text: "가장 인기 있는 펀딩은 무엇인가요?".to_string(),
        identity: None,
    }
}

async fn run(
    coordinator: &RetryCoordinator,
    question: &Question,
) -> (Result<viewchat_pipeline::RunReport, ViewchatError>, Vec<StreamFrame>) {
    let (tx, mut rx) = mpsc::channel(64);
    let report = coordinator.run(question, &tx).await;
    drop(tx);
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    (report, frames)
}

#[tokio::test]
async fn success_reaches_succeeded_after_one_attempt() {
    let llm = ScriptedLlm::new()
        .on_invoke(Ok("SELECT title FROM funding_view LIMIT 1"))
        .on_stream(chunks(&["답변"]));
    let memory = Arc::new(WindowMemory::new(3));
    let coordinator = coordinator(&llm, ScriptedExecutor::new(), memory.clone(), 3);

    let (report, frames) = run(&coordinator, &question("s")).await;
    let report = report.expect("run");

    assert_eq!(report.state, CoordinatorState::Succeeded);
    assert!(report.state.is_terminal());
    assert_eq!(report.attempts, 1);
    assert!(report.error.is_none());
    assert_eq!(
        frames,
        vec![StreamFrame::Start, StreamFrame::data("답변"), StreamFrame::End]
    );
}

#[tokio::test]
async fn rate_limited_transitions_never_exceed_max_attempts() {
    for max_attempts in 1..=4 {
        let mut llm = ScriptedLlm::new();
        for _ in 0..max_attempts + 2 {
            llm = llm.on_invoke(Err(rate_limited()));
        }
        let memory = Arc::new(WindowMemory::new(3));
        memory
            .append("s", ConversationTurn::new("이전 질문", "SELECT 1 FROM funding_view"))
            .await
            .unwrap();
        let coordinator = coordinator(&llm, ScriptedExecutor::new(), memory.clone(), max_attempts);

        let (report, frames) = run(&coordinator, &question("s")).await;
        let report = report.expect("run");

        assert_eq!(report.state, CoordinatorState::Exhausted);
        assert_eq!(report.attempts, max_attempts);
        assert!(matches!(
            report.error,
            Some(ViewchatError::MaxRetriesExceeded { max }) if max == max_attempts
        ));
        assert_eq!(llm.invoke_requests().len(), max_attempts);
        assert!(memory.snapshot("s").await.unwrap().is_empty());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].status_code(), 429);
    }
}

#[tokio::test]
async fn non_throttling_stream_failure_is_not_retried() {
    let llm = ScriptedLlm::new()
        .on_invoke(Ok("SELECT title FROM funding_view LIMIT 1"))
        .on_stream(vec![
            Ok(StreamEvent::ContentChunk("부분".to_string())),
            Err(ViewchatError::Streaming("connection reset".to_string())),
        ]);
    let memory = Arc::new(WindowMemory::new(3));
    let coordinator = coordinator(&llm, ScriptedExecutor::new(), memory.clone(), 3);

    let (report, frames) = run(&coordinator, &question("s")).await;
    let report = report.expect("run");

    assert_eq!(report.state, CoordinatorState::Failed);
    assert!(matches!(report.error, Some(ViewchatError::Streaming(_))));
    assert_eq!(llm.invoke_requests().len(), 1);
    assert_well_framed(&frames);
    assert_eq!(frames[1], StreamFrame::data("부분"));
    assert!(matches!(frames[2], StreamFrame::Error { code: 500, .. }));
    assert!(memory.snapshot("s").await.unwrap().is_empty());
}

#[tokio::test]
async fn dropped_receiver_cancels_before_any_model_call() {
    let llm = ScriptedLlm::new()
        .on_invoke(Ok("SELECT title FROM funding_view LIMIT 1"))
        .on_stream(chunks(&["unused"]));
    let coordinator = coordinator(
        &llm,
        ScriptedExecutor::new(),
        Arc::new(WindowMemory::new(3)),
        3,
    );

    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let err = coordinator.run(&question("s"), &tx).await.unwrap_err();

    assert!(matches!(err, ViewchatError::Cancelled));
    assert!(llm.invoke_requests().is_empty());
}

#[tokio::test]
async fn dropped_receiver_stops_mid_stream() {
    let parts: Vec<String> = (0..32).map(|n| format!("chunk-{n} ")).collect();
    let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
    let llm = ScriptedLlm::new()
        .on_invoke(Ok("SELECT title FROM funding_view LIMIT 1"))
        .on_stream(chunks(&parts));
    let memory = Arc::new(WindowMemory::new(3));
    let coordinator = Arc::new(coordinator(&llm, ScriptedExecutor::new(), memory.clone(), 3));

    let (tx, mut rx) = mpsc::channel(1);
    let task = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run(&question("s"), &tx).await })
    };

    assert_eq!(rx.recv().await, Some(StreamFrame::Start));
    assert_eq!(rx.recv().await, Some(StreamFrame::data("chunk-0 ")));
    drop(rx);

    let outcome = task.await.expect("task joins");
    assert!(matches!(outcome, Err(ViewchatError::Cancelled)));
    assert_eq!(llm.stream_requests().len(), 1);
    // the abandoned question leaves no turn behind
    assert!(memory.snapshot("s").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hanging_up_during_backoff_stops_without_another_attempt() {
    let llm = ScriptedLlm::new()
        .on_invoke(Err(rate_limited()))
        .on_invoke(Ok("SELECT title FROM funding_view LIMIT 1"))
        .on_stream(chunks(&["unused"]));
    let executor = ScriptedExecutor::new();
    let memory = Arc::new(WindowMemory::new(3));
    let coordinator = Arc::new(
        coordinator(&llm, executor.clone(), memory.clone(), 3)
            .with_backoff(Duration::from_secs(5)),
    );

    let started = tokio::time::Instant::now();
    let (tx, mut rx) = mpsc::channel(4);
    let task = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run(&question("s"), &tx).await })
    };

    assert_eq!(rx.recv().await, Some(StreamFrame::Start));
    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(rx);

    let outcome = task.await.expect("task joins");
    assert!(matches!(outcome, Err(ViewchatError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(llm.invoke_requests().len(), 1);
    assert!(llm.stream_requests().is_empty());
    assert!(executor.executed().is_empty());
    assert!(memory.snapshot("s").await.unwrap().is_empty());
}
