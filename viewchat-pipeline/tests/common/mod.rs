#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use viewchat_core::{
    LlmRequest, LlmResponse, Runnable, StreamEvent, StreamFrame, Value, ViewchatError,
};
use viewchat_pipeline::PipelineConfig;
use viewchat_sql::{QueryExecutor, QueryResult, Row, SchemaContext, SchemaDescriptor};

type Events = Vec<Result<StreamEvent, ViewchatError>>;

#[derive(Default)]
struct Script {
    invokes: VecDeque<Result<String, ViewchatError>>,
    streams: VecDeque<Events>,
    invoke_requests: Vec<LlmRequest>,
    stream_requests: Vec<LlmRequest>,
}

/// Replays canned translation replies and summary streams in order.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    script: Arc<Mutex<Script>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_invoke(self, reply: Result<&str, ViewchatError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .invokes
            .push_back(reply.map(str::to_string));
        self
    }

    pub fn on_stream(self, events: Events) -> Self {
        self.script.lock().unwrap().streams.push_back(events);
        self
    }

    pub fn invoke_requests(&self) -> Vec<LlmRequest> {
        self.script.lock().unwrap().invoke_requests.clone()
    }

    pub fn stream_requests(&self) -> Vec<LlmRequest> {
        self.script.lock().unwrap().stream_requests.clone()
    }
}

#[async_trait]
impl Runnable<LlmRequest, LlmResponse> for ScriptedLlm {
    async fn invoke(&self, input: LlmRequest) -> Result<LlmResponse, ViewchatError> {
        let mut script = self.script.lock().unwrap();
        script.invoke_requests.push(input);
        let reply = script
            .invokes
            .pop_front()
            .unwrap_or_else(|| Err(ViewchatError::LlmProvider("no scripted reply".to_string())));
        reply.map(|content| LlmResponse { content })
    }

    fn stream(&self, input: LlmRequest) -> BoxStream<'_, Result<StreamEvent, ViewchatError>> {
        let mut script = self.script.lock().unwrap();
        script.stream_requests.push(input);
        let events = script.streams.pop_front().unwrap_or_else(|| {
            vec![Err(ViewchatError::LlmProvider(
                "no scripted stream".to_string(),
            ))]
        });
        stream::iter(events).boxed()
    }
}

/// Returns canned results and records every statement it was given.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    results: Arc<Mutex<VecDeque<Result<QueryResult, ViewchatError>>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_execute(self, result: Result<QueryResult, ViewchatError>) -> Self {
        self.results.lock().unwrap().push_back(result);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult, ViewchatError> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(QueryResult::default()))
    }
}

pub fn chunks(parts: &[&str]) -> Events {
    let mut events: Events = parts
        .iter()
        .map(|part| Ok(StreamEvent::ContentChunk(part.to_string())))
        .collect();
    events.push(Ok(StreamEvent::FinalAnswer(parts.concat())));
    events
}

pub fn rate_limited() -> ViewchatError {
    ViewchatError::RateLimited {
        retry_after: Some(Duration::from_secs(2)),
    }
}

pub fn schema() -> SchemaContext {
    SchemaContext::new(SchemaDescriptor::funding_view()).expect("funding view schema")
}

pub fn config() -> PipelineConfig {
    PipelineConfig {
        backoff: Duration::from_millis(10),
        ..PipelineConfig::default()
    }
}

pub fn row(cells: &[(&str, Value)]) -> Row {
    cells
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub fn result(rows: Vec<Row>) -> QueryResult {
    let columns = rows
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();
    QueryResult::new(columns, rows)
}

pub async fn collect_frames<S>(frames: S) -> Vec<StreamFrame>
where
    S: futures::Stream<Item = StreamFrame>,
{
    frames.collect::<Vec<_>>().await
}

/// One leading Start, one trailing terminal frame, nothing terminal in
/// between.
pub fn assert_well_framed(frames: &[StreamFrame]) {
    assert!(frames.len() >= 2, "too few frames: {frames:?}");
    assert_eq!(frames[0], StreamFrame::Start, "stream must open with Start: {frames:?}");
    assert!(
        frames.last().is_some_and(StreamFrame::is_terminal),
        "stream must close with End or Error: {frames:?}"
    );
    assert_eq!(
        frames.iter().filter(|frame| frame.is_terminal()).count(),
        1,
        "exactly one terminal frame expected: {frames:?}"
    );
    assert_eq!(
        frames
            .iter()
            .filter(|frame| **frame == StreamFrame::Start)
            .count(),
        1,
        "exactly one Start expected: {frames:?}"
    );
}

pub fn data_text(frames: &[StreamFrame]) -> String {
    frames
        .iter()
        .filter_map(|frame| match frame {
            StreamFrame::Data { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}
