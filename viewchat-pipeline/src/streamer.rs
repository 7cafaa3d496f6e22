use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tracing::Instrument;
use viewchat_core::{Llm, LlmRequest, StreamEvent, StreamFrame, Value, ViewchatError};
use viewchat_memory::{transcript, ConversationTurn};
use viewchat_prompt::{ChatPromptTemplate, MessagePromptTemplate};
use viewchat_sql::QueryResult;

/// Stands in for row data when the query matched nothing.
pub const NO_DATA_MARKER: &str = "NO_DATA";

const SYSTEM_PROMPT: &str = "\
You summarise query results for users of a donation platform. Answer in the language of the question, in two or three concise sentences, using only the data given. When the data is {{no_data}}, say that the requested information is not available; never invent figures.";

const WORKED_EXAMPLES: &[(&str, &str)] = &[
    (
        "Question: 가장 인기 있는 펀딩은 무엇인가요?\nData: [{\"title\":\"숲 살리기\",\"percent\":87.5,\"cur_amount\":1750000}]\nAnswer:",
        "가장 인기 있는 펀딩은 '숲 살리기'입니다. 현재 1,750,000원이 모여 달성률 87.5%를 기록하고 있어요.",
    ),
    (
        "Question: How much have I donated so far?\nData: [{\"total\":150000}]\nAnswer:",
        "You have donated 150,000 won in total so far. Thank you for your support!",
    ),
    (
        "Question: 마감된 환경 펀딩이 있나요?\nData: NO_DATA\nAnswer:",
        "요청하신 정보는 현재 데이터에서 찾을 수 없습니다. 다른 조건으로 다시 질문해 주세요.",
    ),
];

/// Streams a short natural-language answer for a query result.
///
/// Every stream is `Start`, then `Data` frames as tokens arrive, then
/// exactly one `End` or `Error`. Nothing follows the terminal frame.
pub struct ResponseStreamer {
    llm: Arc<dyn Llm>,
    prompt: ChatPromptTemplate,
    model: String,
    temperature: f32,
}

impl ResponseStreamer {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        let mut messages = vec![MessagePromptTemplate::system(SYSTEM_PROMPT)];
        for (question, answer) in WORKED_EXAMPLES {
            messages.push(MessagePromptTemplate::human(question));
            messages.push(MessagePromptTemplate::ai(answer));
        }
        messages.push(MessagePromptTemplate::placeholder("history"));
        messages.push(MessagePromptTemplate::human(
            "Question: {{question}}\nData: {{data}}\nAnswer:",
        ));

        Self {
            llm,
            prompt: ChatPromptTemplate::new(messages),
            model: String::new(),
            temperature: 0.3,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn build_request(
        &self,
        question: &str,
        result: &QueryResult,
        history: &[ConversationTurn],
    ) -> Result<LlmRequest, ViewchatError> {
        let data = if result.is_empty() {
            NO_DATA_MARKER.to_string()
        } else {
            result.to_prompt_data()?
        };

        let mut vars = HashMap::new();
        vars.insert("no_data".to_string(), Value::from(NO_DATA_MARKER));
        vars.insert("history".to_string(), serde_json::to_value(transcript(history))?);
        vars.insert("question".to_string(), Value::from(question));
        vars.insert("data".to_string(), Value::from(data));

        Ok(LlmRequest {
            model: self.model.clone(),
            messages: self.prompt.format_messages(&vars)?,
            temperature: Some(self.temperature),
        })
    }

    pub fn summarize_stream(
        &self,
        question: &str,
        result: &QueryResult,
        history: &[ConversationTurn],
    ) -> BoxStream<'_, StreamFrame> {
        let span = tracing::info_span!("viewchat_summarize", rows = result.len());

        let request = match span.in_scope(|| self.build_request(question, result, history)) {
            Ok(request) => request,
            Err(err) => {
                span.in_scope(|| tracing::error!(error = %err, "failed to build summary prompt"));
                return stream::iter([StreamFrame::Start, StreamFrame::from_error(&err)]).boxed();
            }
        };

        frame_events(self.llm.stream(request), span)
    }
}

enum Phase<'a> {
    Start(BoxStream<'a, Result<StreamEvent, ViewchatError>>),
    Streaming(BoxStream<'a, Result<StreamEvent, ViewchatError>>),
    Done,
}

/// Wraps model stream events into frames: one `Start`, non-empty chunks as
/// `Data`, then a single terminal frame. Only a final answer ends the stream
/// with `End`; a provider stream that simply stops is a streaming failure.
///
/// Every poll of the returned stream runs inside `span`.
pub fn frame_events<'a>(
    events: BoxStream<'a, Result<StreamEvent, ViewchatError>>,
    span: tracing::Span,
) -> BoxStream<'a, StreamFrame> {
    stream::unfold((Phase::Start(events), span), |(phase, span)| {
        let step = span.clone();
        async move {
            let (frame, next) = match phase {
                Phase::Start(events) => (StreamFrame::Start, Phase::Streaming(events)),
                Phase::Streaming(events) => next_frame(events).await,
                Phase::Done => return None,
            };
            Some((frame, (next, span)))
        }
        .instrument(step)
    })
    .boxed()
}

async fn next_frame(
    mut events: BoxStream<'_, Result<StreamEvent, ViewchatError>>,
) -> (StreamFrame, Phase<'_>) {
    loop {
        match events.next().await {
            Some(Ok(StreamEvent::ContentChunk(text))) => {
                if !text.is_empty() {
                    return (StreamFrame::data(text), Phase::Streaming(events));
                }
            }
            Some(Ok(StreamEvent::Metadata { .. })) => {}
            Some(Ok(StreamEvent::FinalAnswer(_))) => {
                tracing::debug!("summary complete");
                return (StreamFrame::End, Phase::Done);
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "summary stream failed");
                return (StreamFrame::from_error(&err), Phase::Done);
            }
            None => {
                let err = ViewchatError::Streaming(
                    "summary stream ended before completion".to_string(),
                );
                tracing::warn!(error = %err, "provider closed the stream early");
                return (StreamFrame::from_error(&err), Phase::Done);
            }
        }
    }
}
